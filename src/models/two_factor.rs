use chrono::{DateTime, Utc};
use regex::Regex;
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;
use validator::{Validate, ValidationError};

static OTP_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{6}$").expect("static regex"));

pub fn validate_otp_code(code: &str) -> Result<(), ValidationError> {
    if OTP_CODE.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::new("otp_code").with_message("code must be exactly 6 digits".into()))
    }
}

/// Second factor a user has enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorMethod {
    Totp,
    Email,
    Sms,
}

impl TwoFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwoFactorMethod::Totp => "totp",
            TwoFactorMethod::Email => "email",
            TwoFactorMethod::Sms => "sms",
        }
    }

    /// Email and SMS deliver a one-time code; TOTP is computed on the device.
    pub fn uses_challenge(&self) -> bool {
        matches!(self, TwoFactorMethod::Email | TwoFactorMethod::Sms)
    }
}

impl fmt::Display for TwoFactorMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TwoFactorMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "totp" => Ok(TwoFactorMethod::Totp),
            "email" => Ok(TwoFactorMethod::Email),
            "sms" => Ok(TwoFactorMethod::Sms),
            other => Err(format!("unknown two-factor method '{}'", other)),
        }
    }
}

/// Short-lived email/SMS one-time code.
#[derive(Debug, Clone)]
pub struct TwoFactorChallenge {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub code: String,
    pub method: TwoFactorMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub attempts: i32,
    pub used_at: Option<DateTime<Utc>>,
}

impl TwoFactorChallenge {
    /// `attempts` already includes the attempt being evaluated.
    pub fn is_valid_at(&self, now: DateTime<Utc>, max_attempts: i32) -> bool {
        !self.is_used && now <= self.expires_at && self.attempts <= max_attempts
    }
}

/// Response when setting up TOTP (contains the secret - sent once only)
#[derive(Debug, Serialize, JsonSchema)]
pub struct TotpSetupResponse {
    /// The TOTP secret in base32 format (for manual entry)
    pub secret: String,
    /// otpauth:// URI for authenticator apps
    pub provisioning_uri: String,
    /// QR code as an SVG data URL
    pub qr_code: String,
}

/// A 6-digit code from an authenticator app or a delivered challenge
#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TwoFactorCodeRequest {
    #[validate(custom(function = "crate::models::two_factor::validate_otp_code"))]
    pub code: String,
}

/// Request to enroll email or SMS as the second factor
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TwoFactorEnrollRequest {
    pub method: TwoFactorMethod,
}

/// Request to disable 2FA (requires password + current code)
#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TwoFactorDisableRequest {
    #[validate(length(min = 1))]
    pub password: String,
    #[validate(custom(function = "crate::models::two_factor::validate_otp_code"))]
    pub code: String,
}

/// Request a fresh email/SMS code while a login is pending
#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct ChallengeResendRequest {
    #[validate(length(min = 1))]
    pub pending_token: String,
}

/// Confirm an email/SMS enrollment with the code that was sent
#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct TwoFactorConfirmRequest {
    pub method: TwoFactorMethod,
    #[validate(custom(function = "crate::models::two_factor::validate_otp_code"))]
    pub code: String,
}

/// Login that passed the password check and waits for its second factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTwoFactor {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub method: TwoFactorMethod,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ChallengeIssuedResponse {
    pub method: TwoFactorMethod,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub method: Option<TwoFactorMethod>,
}
