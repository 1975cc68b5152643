use crate::config::CacheConfig;
use crate::error::app_error::AppError;
use redis::aio::ConnectionManager;
use rocket::fairing::AdHoc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub type SharedCache = Arc<dyn SessionCache>;

/// Key/value store with native TTLs and an ordered-set primitive for secondary indexes.
///
/// Index mutations must be atomic on the server side; callers never read-modify-write an
/// index, so two concurrent writers for the same key cannot lose each other's members.
#[async_trait::async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    /// Overwrite an existing key and keep its remaining TTL. Returns `false` if the key is gone.
    async fn replace_keep_ttl(&self, key: &str, value: &str) -> Result<bool, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    /// Read and delete in one step.
    async fn take(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn index_add(&self, key: &str, member: &str, score: i64) -> Result<(), AppError>;

    /// Remove members; an index left empty disappears.
    async fn index_remove(&self, key: &str, members: &[String]) -> Result<(), AppError>;

    /// Members ordered by score, oldest first. Missing index reads as empty.
    async fn index_members(&self, key: &str) -> Result<Vec<String>, AppError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError>;

    /// Atomically increment a counter and return the new value. The TTL starts with the first increment.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl RedisCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self, AppError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| AppError::cache("Invalid cache URL", e))?;
        let conn = ConnectionManager::new(client).await.map_err(|e| AppError::cache("Failed to connect to cache", e))?;

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            timeout: Duration::from_millis(config.operation_timeout_ms),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| AppError::cache(format!("Cache {} failed", op), e)),
            Err(_) => {
                tracing::warn!(op = op, timeout_ms = self.timeout.as_millis() as u64, "cache call timed out");
                Err(AppError::transient(format!("Cache {} timed out", op)))
            }
        }
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait::async_trait]
impl SessionCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let value: Option<String> = self.run("get", async move { redis::cmd("GET").arg(&key).query_async(&mut conn).await }).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let secs = ttl_seconds(ttl);
        let _: () = self
            .run("set", async move { redis::cmd("SET").arg(&key).arg(value).arg("EX").arg(secs).query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn replace_keep_ttl(&self, key: &str, value: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let reply: Option<String> = self
            .run("replace", async move {
                redis::cmd("SET").arg(&key).arg(value).arg("XX").arg("KEEPTTL").query_async(&mut conn).await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let _: () = self.run("delete", async move { redis::cmd("DEL").arg(&key).query_async(&mut conn).await }).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let value: Option<String> = self.run("take", async move { redis::cmd("GETDEL").arg(&key).query_async(&mut conn).await }).await?;
        Ok(value)
    }

    async fn index_add(&self, key: &str, member: &str, score: i64) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let _: () = self
            .run("index_add", async move { redis::cmd("ZADD").arg(&key).arg(score).arg(member).query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn index_remove(&self, key: &str, members: &[String]) -> Result<(), AppError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let _: () = self
            .run("index_remove", async move { redis::cmd("ZREM").arg(&key).arg(members).query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn index_members(&self, key: &str) -> Result<Vec<String>, AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let members: Vec<String> = self
            .run("index_members", async move { redis::cmd("ZRANGE").arg(&key).arg(0).arg(-1).query_async(&mut conn).await })
            .await?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let secs = ttl_seconds(ttl);
        let _: () = self.run("expire", async move { redis::cmd("EXPIRE").arg(&key).arg(secs).query_async(&mut conn).await }).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, AppError> {
        let mut conn = self.conn.clone();
        let key = self.key(key);
        let secs = ttl_seconds(ttl);
        let (count,): (i64,) = self
            .run("incr", async move {
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(&key)
                    .cmd("EXPIRE")
                    .arg(&key)
                    .arg(secs)
                    .arg("NX")
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = self.run("ping", async move { redis::cmd("PING").query_async(&mut conn).await }).await?;
        Ok(())
    }
}

pub fn stage_cache(cache_config: CacheConfig) -> AdHoc {
    AdHoc::try_on_ignite("Redis session cache", |rocket| async move {
        match RedisCache::connect(&cache_config).await {
            Ok(cache) => {
                tracing::info!(prefix = %cache_config.key_prefix, "Session cache connected");
                let shared: SharedCache = Arc::new(cache);
                Ok(rocket.manage(shared))
            }
            Err(e) => {
                tracing::error!("Failed to connect session cache: {}", e);
                Err(rocket)
            }
        }
    })
}
