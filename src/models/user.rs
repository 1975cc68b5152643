use crate::models::token::TokenPair;
use crate::models::two_factor::TwoFactorMethod;
use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// The slice of the user record this service reads and writes.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub company_id: Option<Uuid>,
    pub two_factor_enabled: bool,
    pub two_factor_method: Option<TwoFactorMethod>,
    /// AES-256-GCM ciphertext of the Base32 TOTP secret, base64 encoded.
    pub totp_secret_encrypted: Option<String>,
    pub totp_secret_nonce: Option<String>,
    /// SHA-256 of the current refresh token, hex encoded.
    pub refresh_token_hash: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub failed_login_count: i32,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn active_two_factor_method(&self) -> Option<TwoFactorMethod> {
        if self.two_factor_enabled { self.two_factor_method } else { None }
    }
}

/// Role and permission names granted to a user, resolved at login.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAccess {
    pub tenant_roles: Vec<String>,
    pub company_roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct TwoFactorLoginRequest {
    #[validate(length(min = 1))]
    pub pending_token: String,
    #[validate(custom(function = "crate::models::two_factor::validate_otp_code"))]
    pub code: String,
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 12, max = 256))]
    pub new_password: String,
}

#[derive(Serialize, Debug, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated {
        #[serde(flatten)]
        tokens: TokenPair,
    },
    TwoFactorRequired {
        pending_token: String,
        method: TwoFactorMethod,
        expires_at: DateTime<Utc>,
    },
}
