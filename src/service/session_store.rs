use crate::cache::SharedCache;
use crate::error::app_error::AppError;
use crate::models::session::{NewSession, SessionRecord};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

fn index_key(user_id: &Uuid) -> String {
    format!("user_sessions:{}", user_id)
}

/// 128 random bits, hex encoded.
pub fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

fn to_std(duration: Duration) -> std::time::Duration {
    duration.to_std().unwrap_or_default()
}

async fn join<T: Send + 'static>(handle: tokio::task::JoinHandle<Result<T, AppError>>) -> Result<T, AppError> {
    handle.await.map_err(|e| AppError::Internal(format!("Session store task failed: {}", e)))?
}

/// Session records keyed by id, plus a per-user sorted set of ids.
///
/// Multi-step writes run on their own task so a caller that goes away mid-way cannot
/// leave a record without its index entry (or the reverse).
#[derive(Clone)]
pub struct SessionStore {
    cache: SharedCache,
    index_grace: Duration,
}

impl SessionStore {
    pub fn new(cache: SharedCache, index_grace: Duration) -> Self {
        Self { cache, index_grace }
    }

    pub async fn create(&self, data: NewSession, ttl: Duration) -> Result<SessionRecord, AppError> {
        if ttl <= Duration::zero() {
            return Err(AppError::Invalid("Session TTL must be positive".to_string()));
        }

        let now = Utc::now();
        let record = SessionRecord::from_new(generate_session_id(), data, now, now + ttl);
        let payload = serde_json::to_string(&record)?;
        let cache = self.cache.clone();
        let index_ttl = to_std(ttl + self.index_grace);
        let stored = record.clone();

        join(tokio::spawn(async move {
            let key = session_key(&stored.id);
            let index = index_key(&stored.user_id);

            cache.set_with_ttl(&key, &payload, to_std(ttl)).await?;

            let indexed = async {
                cache.index_add(&index, &stored.id, stored.created_at.timestamp_millis()).await?;
                cache.expire(&index, index_ttl).await
            }
            .await;

            if let Err(e) = indexed {
                // A record missing from the index would survive revoke-all, so drop it.
                if let Err(cleanup) = cache.delete(&key).await {
                    tracing::error!(session_id = %stored.id, "failed to remove unindexed session: {}", cleanup);
                }
                return Err(e);
            }
            Ok(())
        }))
        .await?;

        Ok(record)
    }

    /// A miss means expired, revoked, or never existed.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError> {
        match self.cache.get(&session_key(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Removes the record and its index entry. Returns the revoked record, if it still existed.
    pub async fn revoke(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let Some(record) = self.get(session_id).await? else {
            return Ok(None);
        };

        let cache = self.cache.clone();
        let removed = record.clone();
        join(tokio::spawn(async move {
            cache.delete(&session_key(&removed.id)).await?;
            cache.index_remove(&index_key(&removed.user_id), &[removed.id.clone()]).await
        }))
        .await?;

        Ok(Some(record))
    }

    /// Revokes every indexed session of the user and returns their ids. No index is a no-op.
    pub async fn revoke_all(&self, user_id: &Uuid) -> Result<Vec<String>, AppError> {
        let cache = self.cache.clone();
        let index = index_key(user_id);

        join(tokio::spawn(async move {
            let members = cache.index_members(&index).await?;
            for session_id in &members {
                cache.delete(&session_key(session_id)).await?;
            }
            // Only the ids read above, so a session created concurrently keeps its entry.
            cache.index_remove(&index, &members).await?;
            Ok(members)
        }))
        .await
    }

    /// Live sessions of the user, oldest first. Dangling or expired ids are skipped and pruned.
    pub async fn list_active(&self, user_id: &Uuid, now: DateTime<Utc>) -> Result<Vec<SessionRecord>, AppError> {
        let index = index_key(user_id);
        let members = self.cache.index_members(&index).await?;

        let mut active = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        for session_id in members {
            match self.get(&session_id).await? {
                Some(record) if record.is_active_at(now) => active.push(record),
                _ => stale.push(session_id),
            }
        }

        if !stale.is_empty()
            && let Err(e) = self.cache.index_remove(&index, &stale).await
        {
            tracing::warn!(user_id = %user_id, stale = stale.len(), "failed to prune session index: {}", e);
        }

        Ok(active)
    }

    /// Bumps `last_activity_at` without touching the TTL. Returns `false` if the session is gone.
    pub async fn refresh_activity(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let Some(mut record) = self.get(session_id).await? else {
            return Ok(false);
        };
        record.last_activity_at = now;
        let payload = serde_json::to_string(&record)?;
        self.cache.replace_keep_ttl(&session_key(session_id), &payload).await
    }
}
