use crate::models::device::{DeviceClass, DeviceFingerprint, GeoLocation};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Everything the caller knows about a session before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub company_id: Option<Uuid>,
    pub tenant_roles: Vec<String>,
    pub company_roles: Vec<String>,
    pub permissions: Vec<String>,
    pub fingerprint: DeviceFingerprint,
    pub allow_ip_change: bool,
    pub allow_browser_change: bool,
}

/// Session record as held in the cache under `session:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub company_id: Option<Uuid>,
    pub tenant_roles: Vec<String>,
    pub company_roles: Vec<String>,
    pub permissions: Vec<String>,
    pub fingerprint: DeviceFingerprint,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub allow_ip_change: bool,
    pub allow_browser_change: bool,
}

impl SessionRecord {
    pub fn from_new(id: String, data: NewSession, created_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: data.user_id,
            tenant_id: data.tenant_id,
            email: data.email,
            company_id: data.company_id,
            tenant_roles: data.tenant_roles,
            company_roles: data.company_roles,
            permissions: data.permissions,
            fingerprint: data.fingerprint,
            created_at,
            last_activity_at: created_at,
            expires_at,
            allow_ip_change: data.allow_ip_change,
            allow_browser_change: data.allow_browser_change,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now)
    }
}

/// Why a session failed security validation. Never shown to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRejection {
    SessionNotFound,
    SessionExpired,
    IpMismatch,
    DeviceMismatch,
    SuspiciousLocation,
}

impl SessionRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRejection::SessionNotFound => "session_not_found",
            SessionRejection::SessionExpired => "session_expired",
            SessionRejection::IpMismatch => "ip_mismatch",
            SessionRejection::DeviceMismatch => "device_mismatch",
            SessionRejection::SuspiciousLocation => "suspicious_location",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityVerdict {
    pub valid: bool,
    pub reason: Option<SessionRejection>,
}

impl SecurityVerdict {
    pub fn valid() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn rejected(reason: SessionRejection) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Active session as listed to its owner.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SessionSummary {
    pub id: String,
    pub ip_address: String,
    pub browser: String,
    pub os: String,
    pub device_class: DeviceClass,
    pub location: Option<GeoLocation>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True for the session making the request.
    pub current: bool,
}

impl SessionSummary {
    pub fn from_record(record: &SessionRecord, current_session_id: &str) -> Self {
        Self {
            id: record.id.clone(),
            ip_address: record.fingerprint.ip_address.clone(),
            browser: record.fingerprint.browser.clone(),
            os: record.fingerprint.os.clone(),
            device_class: record.fingerprint.device_class,
            location: record.fingerprint.location.clone(),
            created_at: record.created_at,
            last_activity_at: record.last_activity_at,
            expires_at: record.expires_at,
            current: record.id == current_session_id,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RevokedSessionsResponse {
    pub revoked: usize,
}

/// Optional note stored with an administrator's revocation.
#[derive(Debug, Default, Deserialize, Validate, JsonSchema)]
pub struct AdminRevokeRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}
