use chrono::{DateTime, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use uuid::Uuid;
use validator::Validate;

/// Claim set of a signed access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject - user id.
    pub sub: String,
    pub tenant_id: String,
    pub session_id: String,
    pub email: String,
    /// Unique token id, distinct even for identical content.
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verified identity recovered from an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub session_id: String,
    pub email: String,
    pub token_id: String,
    pub expires_at: i64,
}

impl TryFrom<AccessTokenClaims> for SessionClaims {
    type Error = uuid::Error;

    fn try_from(claims: AccessTokenClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: Uuid::parse_str(&claims.sub)?,
            tenant_id: Uuid::parse_str(&claims.tenant_id)?,
            session_id: claims.session_id,
            email: claims.email,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }
}

/// Opaque refresh token plus the moment it stops being accepted.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub access_token: String,
    #[validate(length(min = 1))]
    pub refresh_token: String,
}
