use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::device::DeviceClass;
use crate::models::session_history::SessionHistoryEntry;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait SessionHistoryRepository: Send + Sync {
    async fn insert_history(&self, entry: &SessionHistoryEntry) -> Result<(), AppError>;

    async fn list_history(&self, tenant_id: &Uuid, user_id: &Uuid, limit: i64) -> Result<Vec<SessionHistoryView>, AppError>;
}

/// History row as shown to the account owner.
#[derive(Debug, Serialize, JsonSchema, sqlx::FromRow)]
pub struct SessionHistoryView {
    pub session_id: Option<String>,
    pub action: String,
    pub ip_address: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
}

fn device_class_label(class: DeviceClass) -> &'static str {
    match class {
        DeviceClass::Desktop => "desktop",
        DeviceClass::Mobile => "mobile",
        DeviceClass::Tablet => "tablet",
        DeviceClass::Bot => "bot",
        DeviceClass::Unknown => "unknown",
    }
}

#[async_trait::async_trait]
impl SessionHistoryRepository for PostgresRepository {
    async fn insert_history(&self, entry: &SessionHistoryEntry) -> Result<(), AppError> {
        let fingerprint = entry.fingerprint.as_ref();
        let location = fingerprint.and_then(|f| f.location.as_ref());

        sqlx::query(
            r#"
            INSERT INTO session_history
                (tenant_id, user_id, session_id, action, ip_address, user_agent, browser, os, device_class,
                 country_code, city, occurred_at, revoked_by, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(entry.session_id.as_deref())
        .bind(entry.action.as_str())
        .bind(fingerprint.map(|f| f.ip_address.as_str()))
        .bind(fingerprint.map(|f| f.user_agent.as_str()))
        .bind(fingerprint.map(|f| f.browser.as_str()))
        .bind(fingerprint.map(|f| f.os.as_str()))
        .bind(fingerprint.map(|f| device_class_label(f.device_class)))
        .bind(location.map(|l| l.country_code.as_str()))
        .bind(location.and_then(|l| l.city.as_deref()))
        .bind(entry.occurred_at)
        .bind(entry.revoked_by)
        .bind(entry.reason.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_history(&self, tenant_id: &Uuid, user_id: &Uuid, limit: i64) -> Result<Vec<SessionHistoryView>, AppError> {
        let rows = sqlx::query_as::<_, SessionHistoryView>(
            r#"
            SELECT session_id, action, ip_address, browser, os, country_code, city, occurred_at, reason
            FROM session_history
            WHERE tenant_id = $1 AND user_id = $2
            ORDER BY occurred_at DESC
            LIMIT $3
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
