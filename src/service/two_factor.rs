use crate::config::TwoFactorConfig;
use crate::database::user::{CredentialStore, verify_password};
use crate::error::app_error::AppError;
use crate::models::two_factor::{ChallengeIssuedResponse, TotpSetupResponse, TwoFactorMethod, TwoFactorStatus};
use crate::models::user::User;
use crate::service::challenge::ChallengeService;
use crate::service::totp;
use std::sync::Arc;

/// Enrollment, verification and removal of a user's second factor.
#[derive(Clone)]
pub struct TwoFactorService {
    credentials: Arc<dyn CredentialStore>,
    challenges: ChallengeService,
    encryption_key: [u8; 32],
    issuer_name: String,
}

impl TwoFactorService {
    pub fn new(credentials: Arc<dyn CredentialStore>, challenges: ChallengeService, config: &TwoFactorConfig) -> Result<Self, AppError> {
        let encryption_key = config.parse_encryption_key().map_err(AppError::Internal)?;
        Ok(Self {
            credentials,
            challenges,
            encryption_key,
            issuer_name: config.issuer_name.clone(),
        })
    }

    pub fn challenges(&self) -> &ChallengeService {
        &self.challenges
    }

    pub fn status(&self, user: &User) -> TwoFactorStatus {
        TwoFactorStatus {
            enabled: user.two_factor_enabled,
            method: user.active_two_factor_method(),
        }
    }

    fn totp_secret(&self, user: &User) -> Result<Option<String>, AppError> {
        match (&user.totp_secret_encrypted, &user.totp_secret_nonce) {
            (Some(encrypted), Some(nonce)) => totp::decrypt_secret(encrypted, nonce, &self.encryption_key).map(Some),
            _ => Ok(None),
        }
    }

    /// Checks a code for the given method. TOTP is computed locally; email/SMS hit the latest challenge.
    pub async fn verify(&self, user: &User, method: TwoFactorMethod, code: &str) -> Result<bool, AppError> {
        match method {
            TwoFactorMethod::Totp => Ok(self.totp_secret(user)?.is_some_and(|secret| totp::verify_code_now(&secret, code))),
            TwoFactorMethod::Email | TwoFactorMethod::Sms => self.challenges.verify_latest(&user.id, method, code).await,
        }
    }

    /// Stores a fresh, encrypted secret. 2FA stays off until `enable_totp` sees a valid code.
    pub async fn setup_totp(&self, user: &User) -> Result<TotpSetupResponse, AppError> {
        if user.two_factor_enabled {
            return Err(AppError::BadRequest(
                "Two-factor authentication is already enabled. Disable it first to set up again.".to_string(),
            ));
        }

        let key = self.encryption_key;
        let issuer = self.issuer_name.clone();
        let account = user.email.clone();
        let (secret, encrypted, nonce, provisioning_uri, qr_code) = tokio::task::spawn_blocking(move || {
            let secret = totp::generate_secret();
            let (encrypted, nonce) = totp::encrypt_secret(&secret, &key)?;
            let uri = totp::provisioning_uri(&account, &secret, &issuer);
            let qr_code = totp::qr_code_data_url(&uri)?;
            Ok::<_, AppError>((secret, encrypted, nonce, uri, qr_code))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Task join error: {}", e)))??;

        self.credentials.store_totp_secret(&user.id, &encrypted, &nonce).await?;
        tracing::info!(user_id = %user.id, "TOTP secret generated");

        Ok(TotpSetupResponse {
            secret,
            provisioning_uri,
            qr_code,
        })
    }

    pub async fn enable_totp(&self, user: &User, code: &str) -> Result<(), AppError> {
        if user.two_factor_enabled {
            return Err(AppError::BadRequest("Two-factor authentication is already enabled.".to_string()));
        }

        let secret = self
            .totp_secret(user)?
            .ok_or_else(|| AppError::BadRequest("Two-factor authentication setup not found. Please initialize setup first.".to_string()))?;

        if !totp::verify_code_now(&secret, code) {
            return Err(AppError::Invalid("Invalid verification code".to_string()));
        }

        self.credentials.enable_two_factor(&user.id, TwoFactorMethod::Totp).await?;
        tracing::info!(user_id = %user.id, method = "totp", "two-factor authentication enabled");
        Ok(())
    }

    /// Sends a code over email/SMS; `confirm_enrollment` turns the method on.
    pub async fn start_enrollment(&self, user: &User, method: TwoFactorMethod) -> Result<ChallengeIssuedResponse, AppError> {
        if !method.uses_challenge() {
            return Err(AppError::BadRequest("Use TOTP setup for authenticator apps".to_string()));
        }
        if user.two_factor_enabled {
            return Err(AppError::BadRequest("Two-factor authentication is already enabled.".to_string()));
        }
        if method == TwoFactorMethod::Sms && user.phone_number.is_none() {
            return Err(AppError::BadRequest("A phone number is required for SMS codes".to_string()));
        }

        let challenge = self.challenges.issue_and_send(user, method).await?;
        Ok(ChallengeIssuedResponse {
            method,
            expires_at: challenge.expires_at,
        })
    }

    pub async fn confirm_enrollment(&self, user: &User, method: TwoFactorMethod, code: &str) -> Result<(), AppError> {
        if !method.uses_challenge() {
            return Err(AppError::BadRequest("Use TOTP setup for authenticator apps".to_string()));
        }
        if !self.challenges.verify_latest(&user.id, method, code).await? {
            return Err(AppError::Invalid("Invalid verification code".to_string()));
        }

        self.credentials.enable_two_factor(&user.id, method).await?;
        tracing::info!(user_id = %user.id, method = %method, "two-factor authentication enabled");
        Ok(())
    }

    /// Requires the password and a code for the current method. Clears any TOTP secret.
    pub async fn disable(&self, user: &User, password: &str, code: &str) -> Result<(), AppError> {
        let Some(method) = user.active_two_factor_method() else {
            return Err(AppError::BadRequest("Two-factor authentication is not enabled.".to_string()));
        };

        if !verify_password(Some(user), password)? {
            return Err(AppError::InvalidCredentials);
        }
        if !self.verify(user, method, code).await? {
            return Err(AppError::Invalid("Invalid two-factor code".to_string()));
        }

        self.credentials.disable_two_factor(&user.id).await?;
        tracing::info!(user_id = %user.id, "two-factor authentication disabled");
        Ok(())
    }
}
