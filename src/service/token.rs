use crate::config::TokenConfig;
use crate::error::app_error::AppError;
use crate::models::token::{AccessTokenClaims, IssuedRefreshToken, SessionClaims};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Signs and verifies HS256 access tokens and mints opaque refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.signing_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::minutes(config.access_token_minutes),
            refresh_ttl: Duration::days(config.refresh_token_days),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue_access_token(&self, user_id: Uuid, tenant_id: Uuid, session_id: &str, email: &str) -> Result<String, AppError> {
        self.issue_access_token_with_ttl(user_id, tenant_id, session_id, email, self.access_ttl)
    }

    pub fn issue_access_token_with_ttl(&self, user_id: Uuid, tenant_id: Uuid, session_id: &str, email: &str, ttl: Duration) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            session_id: session_id.to_string(),
            email: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign access token: {}", e)))
    }

    /// 32 random bytes, base64url without padding. Not a JWT.
    pub fn issue_refresh_token(&self) -> IssuedRefreshToken {
        let bytes: [u8; 32] = rand::random();
        IssuedRefreshToken {
            token: URL_SAFE_NO_PAD.encode(bytes),
            expires_at: Utc::now() + self.refresh_ttl,
        }
    }

    fn validation(&self, check_expiry: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["sub", "exp", "iss", "aud"]);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation
    }

    fn decode(&self, token: &str, check_expiry: bool) -> Option<SessionClaims> {
        let data = match jsonwebtoken::decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation(check_expiry)) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(kind = ?e.kind(), "access token rejected");
                return None;
            }
        };
        SessionClaims::try_from(data.claims).ok()
    }

    /// Signature, issuer, audience and expiry. Any failure is `None`.
    pub fn validate_token(&self, token: &str) -> Option<SessionClaims> {
        self.decode(token, true)
    }

    /// Same checks minus expiry. Only the refresh flow may use this.
    pub fn extract_claims_ignoring_expiry(&self, token: &str) -> Option<SessionClaims> {
        self.decode(token, false)
    }
}

/// SHA-256 of a raw refresh token, hex-encoded. Only this value is stored.
pub fn hash_refresh_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
