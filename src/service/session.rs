use crate::config::SessionConfig;
use crate::database::user::CredentialStore;
use crate::error::app_error::AppError;
use crate::models::device::DeviceFingerprint;
use crate::models::session::{NewSession, SessionRecord, SessionRejection};
use crate::models::session_history::{SessionAction, SessionHistoryEntry};
use crate::models::token::{IssuedRefreshToken, RefreshRequest, SessionClaims, TokenPair};
use crate::models::user::{User, UserAccess};
use crate::service::security::SecurityValidator;
use crate::service::session_history::SessionHistoryRecorder;
use crate::service::session_store::SessionStore;
use crate::service::token::{TokenIssuer, hash_refresh_token};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Session lifetime and the drift policy stamped on every new session.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub allow_ip_change: bool,
    pub allow_browser_change: bool,
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            ttl: Duration::hours(config.ttl_hours),
            allow_ip_change: config.allow_ip_change,
            allow_browser_change: config.allow_browser_change,
        }
    }
}

/// Who ended a session and why, for the history row.
#[derive(Debug, Clone, Copy)]
pub struct Revocation<'a> {
    pub action: SessionAction,
    pub revoked_by: Option<Uuid>,
    pub reason: Option<&'a str>,
}

impl Revocation<'_> {
    pub fn by_owner(action: SessionAction) -> Self {
        Self {
            action,
            revoked_by: None,
            reason: None,
        }
    }
}

fn hashes_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len() && expected.bytes().zip(given.bytes()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Create, validate, refresh and revoke sessions.
#[derive(Clone)]
pub struct SessionService {
    store: SessionStore,
    validator: SecurityValidator,
    tokens: TokenIssuer,
    history: SessionHistoryRecorder,
    credentials: Arc<dyn CredentialStore>,
    policy: SessionPolicy,
}

impl SessionService {
    pub fn new(
        store: SessionStore,
        validator: SecurityValidator,
        tokens: TokenIssuer,
        history: SessionHistoryRecorder,
        credentials: Arc<dyn CredentialStore>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            validator,
            tokens,
            history,
            credentials,
            policy,
        }
    }

    pub fn history(&self) -> &SessionHistoryRecorder {
        &self.history
    }

    fn new_session(&self, user: &User, access: UserAccess, fingerprint: &DeviceFingerprint) -> NewSession {
        NewSession {
            user_id: user.id,
            tenant_id: user.tenant_id,
            email: user.email.clone(),
            company_id: user.company_id,
            tenant_roles: access.tenant_roles,
            company_roles: access.company_roles,
            permissions: access.permissions,
            fingerprint: fingerprint.clone(),
            allow_ip_change: self.policy.allow_ip_change,
            allow_browser_change: self.policy.allow_browser_change,
        }
    }

    /// Creates a session for an authenticated user and returns it with a fresh token pair.
    pub async fn create_session(
        &self,
        user: &User,
        fingerprint: &DeviceFingerprint,
        action: SessionAction,
    ) -> Result<(SessionRecord, TokenPair), AppError> {
        self.open_session(user, fingerprint, action, None).await
    }

    /// `rotated` is a refresh token already swapped into the credential store.
    async fn open_session(
        &self,
        user: &User,
        fingerprint: &DeviceFingerprint,
        action: SessionAction,
        rotated: Option<IssuedRefreshToken>,
    ) -> Result<(SessionRecord, TokenPair), AppError> {
        let access = self.credentials.load_access(user).await?;
        let record = self.store.create(self.new_session(user, access, fingerprint), self.policy.ttl).await?;

        let tokens = match self.token_pair(&record, rotated).await {
            Ok(tokens) => tokens,
            Err(e) => {
                if let Err(revoke_err) = self.store.revoke(&record.id).await {
                    tracing::error!(session_id = %record.id, "failed to discard session after token failure: {}", revoke_err);
                }
                return Err(e);
            }
        };

        self.history
            .log(SessionHistoryEntry::new(record.tenant_id, record.user_id, Some(&record.id), action).with_fingerprint(Some(fingerprint)))
            .await;

        Ok((record, tokens))
    }

    /// Mints an access token for the session and replaces the user's stored refresh token.
    pub async fn issue_token_pair(&self, record: &SessionRecord) -> Result<TokenPair, AppError> {
        self.token_pair(record, None).await
    }

    async fn token_pair(&self, record: &SessionRecord, rotated: Option<IssuedRefreshToken>) -> Result<TokenPair, AppError> {
        let access_token = self.tokens.issue_access_token(record.user_id, record.tenant_id, &record.id, &record.email)?;
        let refresh = match rotated {
            Some(refresh) => refresh,
            None => {
                let refresh = self.tokens.issue_refresh_token();
                self.credentials
                    .update_refresh_token(&record.user_id, Some(&hash_refresh_token(&refresh.token)), Some(refresh.expires_at))
                    .await?;
                refresh
            }
        };

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
            token_type: "Bearer",
            expires_in: self.tokens.access_ttl().num_seconds(),
            refresh_expires_at: refresh.expires_at,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError> {
        self.store.get(session_id).await
    }

    /// Loads the session and checks it against the current device.
    ///
    /// Store failures deny. A rejected session is revoked and recorded before the error returns.
    pub async fn validate_security(&self, session_id: &str, current: &DeviceFingerprint) -> Result<SessionRecord, AppError> {
        let stored = match self.store.get(session_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(session_id, "session lookup failed, denying request: {}", e);
                return Err(AppError::Unauthorized);
            }
        };

        let verdict = self.validator.validate(stored.as_ref(), current, Utc::now());
        let Some(reason) = verdict.reason else {
            return stored.ok_or(AppError::Unauthorized);
        };
        let Some(session) = stored.as_ref() else {
            return Err(AppError::Unauthorized);
        };

        match reason {
            SessionRejection::SessionNotFound => Err(AppError::Unauthorized),
            SessionRejection::SessionExpired => {
                self.end_session(session, Revocation::by_owner(SessionAction::Expired), Some(current)).await;
                Err(AppError::Expired("session".to_string()))
            }
            SessionRejection::IpMismatch | SessionRejection::DeviceMismatch | SessionRejection::SuspiciousLocation => {
                let revocation = Revocation {
                    action: SessionAction::RevokedSuspicious,
                    revoked_by: None,
                    reason: Some(reason.as_str()),
                };
                self.end_session(session, revocation, Some(current)).await;
                Err(AppError::PolicyViolation(reason.as_str().to_string()))
            }
        }
    }

    /// Bearer token to a validated, activity-refreshed session.
    pub async fn authenticate(&self, bearer: &str, current: &DeviceFingerprint) -> Result<(SessionClaims, SessionRecord), AppError> {
        let claims = self.tokens.validate_token(bearer).ok_or(AppError::Unauthorized)?;
        let session = self.validate_security(&claims.session_id, current).await?;

        if session.user_id != claims.user_id || session.tenant_id != claims.tenant_id {
            tracing::warn!(session_id = %session.id, user_id = %claims.user_id, "token subject does not own session");
            return Err(AppError::Unauthorized);
        }

        self.refresh_activity(&session.id).await;
        Ok((claims, session))
    }

    /// Best-effort; a failure only leaves `last_activity_at` stale.
    pub async fn refresh_activity(&self, session_id: &str) -> bool {
        match self.store.refresh_activity(session_id, Utc::now()).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(session_id, "failed to refresh session activity: {}", e);
                false
            }
        }
    }

    async fn end_session(&self, session: &SessionRecord, revocation: Revocation<'_>, fingerprint: Option<&DeviceFingerprint>) {
        if let Err(e) = self.store.revoke(&session.id).await {
            tracing::error!(session_id = %session.id, "failed to revoke session: {}", e);
        }
        self.record(session.tenant_id, session.user_id, Some(&session.id), revocation, fingerprint).await;
    }

    async fn record(&self, tenant_id: Uuid, user_id: Uuid, session_id: Option<&str>, revocation: Revocation<'_>, fingerprint: Option<&DeviceFingerprint>) {
        let mut entry = SessionHistoryEntry::new(tenant_id, user_id, session_id, revocation.action)
            .with_fingerprint(fingerprint)
            .revoked_by(revocation.revoked_by);
        if let Some(reason) = revocation.reason {
            entry = entry.reason(reason);
        }
        self.history.log(entry).await;
    }

    /// Revokes one session. Returns the removed record, or `None` if it was already gone.
    pub async fn revoke_session(
        &self,
        session_id: &str,
        revocation: Revocation<'_>,
        fingerprint: Option<&DeviceFingerprint>,
    ) -> Result<Option<SessionRecord>, AppError> {
        let removed = self.store.revoke(session_id).await?;
        if let Some(session) = &removed {
            self.record(session.tenant_id, session.user_id, Some(&session.id), revocation, fingerprint).await;
        }
        Ok(removed)
    }

    /// Revokes every session of the user; one history row per revoked session.
    pub async fn revoke_all_sessions(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        revocation: Revocation<'_>,
        fingerprint: Option<&DeviceFingerprint>,
    ) -> Result<Vec<String>, AppError> {
        let revoked = self.store.revoke_all(&user_id).await?;
        for session_id in &revoked {
            self.record(tenant_id, user_id, Some(session_id), revocation, fingerprint).await;
        }
        if revoked.is_empty() {
            self.record(tenant_id, user_id, None, revocation, fingerprint).await;
        }
        Ok(revoked)
    }

    pub async fn list_active_sessions(&self, user_id: &Uuid) -> Result<Vec<SessionRecord>, AppError> {
        self.store.list_active(user_id, Utc::now()).await
    }

    /// Rotates an expired access token plus the current refresh token into a new session.
    pub async fn refresh_tokens(&self, request: &RefreshRequest, fingerprint: &DeviceFingerprint) -> Result<(SessionRecord, TokenPair), AppError> {
        let claims = self.tokens.extract_claims_ignoring_expiry(&request.access_token).ok_or(AppError::Unauthorized)?;

        let user = self
            .credentials
            .find_user_by_id(&claims.user_id)
            .await?
            .filter(|u| u.is_active && u.tenant_id == claims.tenant_id)
            .ok_or(AppError::Unauthorized)?;

        let presented = hash_refresh_token(&request.refresh_token);
        let stored_matches = user.refresh_token_hash.as_deref().is_some_and(|stored| hashes_match(stored, &presented));
        if !stored_matches {
            tracing::warn!(user_id = %user.id, "refresh token does not match stored token");
            return Err(AppError::Unauthorized);
        }
        if user.refresh_token_expires_at.is_none_or(|expires_at| expires_at <= Utc::now()) {
            return Err(AppError::Expired("refresh token".to_string()));
        }

        // Only one caller can swap out a given refresh token; everyone else is a replay.
        let replacement = self.tokens.issue_refresh_token();
        let swapped = self
            .credentials
            .rotate_refresh_token(&user.id, &presented, &hash_refresh_token(&replacement.token), replacement.expires_at, Utc::now())
            .await?;
        if !swapped {
            tracing::warn!(user_id = %user.id, "refresh token already rotated");
            return Err(AppError::Unauthorized);
        }

        // Superseded, never renewed in place.
        if let Err(e) = self.store.revoke(&claims.session_id).await {
            tracing::warn!(session_id = %claims.session_id, "failed to revoke superseded session: {}", e);
        }

        self.open_session(&user, fingerprint, SessionAction::TokenRefresh, Some(replacement)).await
    }
}
