use crate::models::device::DeviceFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events recorded in `session_history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Login,
    Logout,
    LogoutAll,
    TokenRefresh,
    RevokedByAdmin,
    Expired,
    RevokedSuspicious,
    RevokedPasswordChange,
    TwoFactorVerified,
    TwoFactorFailed,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Login => "login",
            SessionAction::Logout => "logout",
            SessionAction::LogoutAll => "logout_all",
            SessionAction::TokenRefresh => "token_refresh",
            SessionAction::RevokedByAdmin => "revoked_by_admin",
            SessionAction::Expired => "expired",
            SessionAction::RevokedSuspicious => "revoked_suspicious",
            SessionAction::RevokedPasswordChange => "revoked_password_change",
            SessionAction::TwoFactorVerified => "2fa_verified",
            SessionAction::TwoFactorFailed => "2fa_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SessionAction::RevokedSuspicious | SessionAction::TwoFactorFailed)
    }
}

/// Append-only audit row. Inserted once, never updated.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHistoryEntry {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Option<String>,
    pub action: SessionAction,
    pub fingerprint: Option<DeviceFingerprint>,
    pub occurred_at: DateTime<Utc>,
    pub revoked_by: Option<Uuid>,
    pub reason: Option<String>,
}

impl SessionHistoryEntry {
    pub fn new(tenant_id: Uuid, user_id: Uuid, session_id: Option<&str>, action: SessionAction) -> Self {
        Self {
            tenant_id,
            user_id,
            session_id: session_id.map(str::to_string),
            action,
            fingerprint: None,
            occurred_at: Utc::now(),
            revoked_by: None,
            reason: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<&DeviceFingerprint>) -> Self {
        self.fingerprint = fingerprint.cloned();
        self
    }

    pub fn revoked_by(mut self, actor: Option<Uuid>) -> Self {
        self.revoked_by = actor;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_factor_actions_use_short_names() {
        assert_eq!(SessionAction::TwoFactorVerified.as_str(), "2fa_verified");
        assert_eq!(SessionAction::TwoFactorFailed.as_str(), "2fa_failed");
    }

    #[test]
    fn builder_sets_optional_fields() {
        let admin = Uuid::new_v4();
        let entry = SessionHistoryEntry::new(Uuid::new_v4(), Uuid::new_v4(), Some("abc"), SessionAction::RevokedByAdmin)
            .revoked_by(Some(admin))
            .reason("offboarding");
        assert_eq!(entry.session_id.as_deref(), Some("abc"));
        assert_eq!(entry.revoked_by, Some(admin));
        assert_eq!(entry.reason.as_deref(), Some("offboarding"));
        assert!(entry.fingerprint.is_none());
    }
}
