use crate::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::two_factor::ChallengeRepository;
use crate::db::init_pool;
use chrono::Utc;

#[derive(Debug, Clone, Copy)]
pub struct PurgeChallengesResult {
    pub challenges_deleted: u64,
}

/// Deletes expired challenges and challenges that were used before now.
pub async fn purge_stale_challenges(config: &Config) -> Result<PurgeChallengesResult, String> {
    let pool = init_pool(&config.database)
        .await
        .map_err(|err| format!("Failed to initialize database pool: {err}"))?;

    let repo = PostgresRepository { pool: pool.clone() };
    let deleted = repo
        .delete_stale_challenges(Utc::now())
        .await
        .map_err(|err| format!("Failed to purge two-factor challenges: {err:?}"))?;

    pool.close().await;

    tracing::info!(challenges_deleted = deleted, "stale two-factor challenges purged");
    Ok(PurgeChallengesResult { challenges_deleted: deleted })
}
