use crate::cache::SharedCache;
use crate::config::Config;
use crate::database::user::{CredentialStore, hash_password, verify_password};
use crate::error::app_error::AppError;
use crate::models::device::DeviceFingerprint;
use crate::models::session::SessionRecord;
use crate::models::session_history::{SessionAction, SessionHistoryEntry};
use crate::models::token::TokenPair;
use crate::models::two_factor::{ChallengeIssuedResponse, PendingTwoFactor, TwoFactorMethod};
use crate::models::user::{LoginResponse, User};
use crate::service::session::{Revocation, SessionService};
use crate::service::two_factor::TwoFactorService;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

fn pending_key(token: &str) -> String {
    format!("2fa_pending:{}", token)
}

fn pending_attempts_key(token: &str) -> String {
    format!("2fa_pending_attempts:{}", token)
}

fn generate_pending_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// What happened during a login attempt.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Credentials valid and session created.
    Authenticated { session: SessionRecord, tokens: TokenPair },
    /// Credentials valid but a second factor is required before a session is issued.
    TwoFactorRequired {
        pending_token: String,
        method: TwoFactorMethod,
        expires_at: DateTime<Utc>,
    },
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::Authenticated { tokens, .. } => LoginResponse::Authenticated { tokens },
            LoginOutcome::TwoFactorRequired {
                pending_token,
                method,
                expires_at,
            } => LoginResponse::TwoFactorRequired {
                pending_token,
                method,
                expires_at,
            },
        }
    }
}

/// Password login, the pending second-factor step, and password changes.
#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionService,
    two_factor: TwoFactorService,
    cache: SharedCache,
    pending_ttl: Duration,
    max_attempts: i32,
}

impl AuthService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: SessionService,
        two_factor: TwoFactorService,
        cache: SharedCache,
        config: &Config,
    ) -> Self {
        Self {
            credentials,
            sessions,
            two_factor,
            cache,
            pending_ttl: Duration::minutes(config.session.pending_two_factor_minutes),
            max_attempts: config.two_factor.max_attempts,
        }
    }

    pub async fn login(&self, email: &str, password: &str, fingerprint: &DeviceFingerprint) -> Result<LoginOutcome, AppError> {
        let user = self.credentials.find_user_by_email(email).await?;
        let password_ok = verify_password(user.as_ref(), password)?;

        let user = match user {
            Some(user) if !password_ok => {
                self.credentials.record_failed_login(&user.id).await?;
                tracing::warn!(user_id = %user.id, "login failed: wrong password");
                return Err(AppError::InvalidCredentials);
            }
            Some(user) if !user.is_active => {
                tracing::warn!(user_id = %user.id, "login refused: inactive user");
                return Err(AppError::InvalidCredentials);
            }
            Some(user) => user,
            None => return Err(AppError::InvalidCredentials),
        };

        if let Some(method) = user.active_two_factor_method() {
            return self.begin_two_factor(&user, method).await;
        }

        self.credentials.record_successful_login(&user.id).await?;
        let (session, tokens) = self.sessions.create_session(&user, fingerprint, SessionAction::Login).await?;
        Ok(LoginOutcome::Authenticated { session, tokens })
    }

    async fn begin_two_factor(&self, user: &User, method: TwoFactorMethod) -> Result<LoginOutcome, AppError> {
        let now = Utc::now();
        let pending = PendingTwoFactor {
            user_id: user.id,
            tenant_id: user.tenant_id,
            method,
            created_at: now,
        };
        let token = generate_pending_token();
        let ttl = self.pending_ttl.to_std().map_err(|e| AppError::Internal(format!("Invalid pending 2FA TTL: {}", e)))?;
        self.cache.set_with_ttl(&pending_key(&token), &serde_json::to_string(&pending)?, ttl).await?;

        if method.uses_challenge() {
            self.two_factor.challenges().issue_and_send(user, method).await?;
        }

        tracing::info!(user_id = %user.id, method = %method, "login waiting for second factor");
        Ok(LoginOutcome::TwoFactorRequired {
            pending_token: token,
            method,
            expires_at: now + self.pending_ttl,
        })
    }

    async fn load_pending(&self, pending_token: &str) -> Result<(PendingTwoFactor, User), AppError> {
        let raw = self.cache.get(&pending_key(pending_token)).await?.ok_or(AppError::Unauthorized)?;
        let pending: PendingTwoFactor = serde_json::from_str(&raw)?;

        let user = self
            .credentials
            .find_user_by_id(&pending.user_id)
            .await?
            .filter(|u| u.is_active && u.tenant_id == pending.tenant_id)
            .ok_or(AppError::Unauthorized)?;

        Ok((pending, user))
    }

    /// Verifies the second factor of a pending login and creates the session.
    ///
    /// Every guess is counted before the code is checked; at the attempt cap the pending token is discarded.
    /// The counter outlives the discard and expires on its own.
    pub async fn complete_two_factor(&self, pending_token: &str, code: &str, fingerprint: &DeviceFingerprint) -> Result<LoginOutcome, AppError> {
        let key = pending_key(pending_token);
        let attempts_key = pending_attempts_key(pending_token);
        let (pending, user) = self.load_pending(pending_token).await?;

        let ttl = self.pending_ttl.to_std().map_err(|e| AppError::Internal(format!("Invalid pending 2FA TTL: {}", e)))?;
        let attempt = self.cache.incr(&attempts_key, ttl).await?;
        if attempt > i64::from(self.max_attempts) {
            tracing::warn!(user_id = %user.id, attempt, "pending second factor over attempt cap");
            self.cache.delete(&key).await?;
            return Err(AppError::RateLimited);
        }

        if !self.two_factor.verify(&user, pending.method, code).await? {
            self.sessions
                .history()
                .log(
                    SessionHistoryEntry::new(user.tenant_id, user.id, None, SessionAction::TwoFactorFailed)
                        .with_fingerprint(Some(fingerprint))
                        .reason(format!("attempt {}", attempt)),
                )
                .await;
            self.credentials.record_failed_login(&user.id).await?;

            if attempt >= i64::from(self.max_attempts) {
                self.cache.delete(&key).await?;
                return Err(AppError::RateLimited);
            }
            return Err(AppError::Invalid("Invalid two-factor code".to_string()));
        }

        // A pending token completes one login only.
        if self.cache.take(&key).await?.is_none() {
            return Err(AppError::Unauthorized);
        }

        self.sessions
            .history()
            .log(SessionHistoryEntry::new(user.tenant_id, user.id, None, SessionAction::TwoFactorVerified).with_fingerprint(Some(fingerprint)))
            .await;

        self.credentials.record_successful_login(&user.id).await?;
        let (session, tokens) = self.sessions.create_session(&user, fingerprint, SessionAction::Login).await?;
        Ok(LoginOutcome::Authenticated { session, tokens })
    }

    /// Sends a fresh email/SMS code for a pending login.
    pub async fn resend_challenge(&self, pending_token: &str) -> Result<ChallengeIssuedResponse, AppError> {
        let (pending, user) = self.load_pending(pending_token).await?;
        if !pending.method.uses_challenge() {
            return Err(AppError::BadRequest("Authenticator app codes are not sent".to_string()));
        }

        let challenge = self.two_factor.challenges().issue_and_send(&user, pending.method).await?;
        Ok(ChallengeIssuedResponse {
            method: pending.method,
            expires_at: challenge.expires_at,
        })
    }

    /// Replaces the password and ends every session of the user, the caller's included.
    pub async fn change_password(
        &self,
        session: &SessionRecord,
        current_password: &str,
        new_password: &str,
        fingerprint: &DeviceFingerprint,
    ) -> Result<Vec<String>, AppError> {
        let user = self.credentials.find_user_by_id(&session.user_id).await?.ok_or(AppError::Unauthorized)?;

        if !verify_password(Some(&user), current_password)? {
            return Err(AppError::InvalidCredentials);
        }
        if current_password == new_password {
            return Err(AppError::BadRequest("New password must differ from the current one".to_string()));
        }

        let hash = hash_password(new_password)?;
        self.credentials.update_password_hash(&user.id, &hash).await?;
        tracing::info!(user_id = %user.id, "password changed");

        let revocation = Revocation {
            action: SessionAction::RevokedPasswordChange,
            revoked_by: Some(user.id),
            reason: None,
        };
        self.sessions.revoke_all_sessions(user.tenant_id, user.id, revocation, Some(fingerprint)).await
    }

    pub async fn find_user(&self, user_id: &Uuid) -> Result<User, AppError> {
        self.credentials
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }
}
