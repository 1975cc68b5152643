use crate::database::session_history::SessionHistoryRepository;
use crate::models::session_history::SessionHistoryEntry;
use std::sync::Arc;

/// Best-effort audit writer: a failed insert is logged and swallowed.
#[derive(Clone)]
pub struct SessionHistoryRecorder {
    repo: Arc<dyn SessionHistoryRepository>,
}

impl SessionHistoryRecorder {
    pub fn new(repo: Arc<dyn SessionHistoryRepository>) -> Self {
        Self { repo }
    }

    pub async fn log(&self, entry: SessionHistoryEntry) {
        let action = entry.action.as_str();

        if entry.action.is_failure() {
            tracing::warn!(
                category = "session",
                action,
                tenant_id = %entry.tenant_id,
                user_id = %entry.user_id,
                session_id = entry.session_id.as_deref().unwrap_or("-"),
                reason = entry.reason.as_deref().unwrap_or("-"),
                "session event"
            );
        } else {
            tracing::info!(
                category = "session",
                action,
                tenant_id = %entry.tenant_id,
                user_id = %entry.user_id,
                session_id = entry.session_id.as_deref().unwrap_or("-"),
                "session event"
            );
        }

        if let Err(e) = self.repo.insert_history(&entry).await {
            tracing::error!(
                category = "session",
                action,
                user_id = %entry.user_id,
                "failed to write session history: {}",
                e
            );
        }
    }
}
