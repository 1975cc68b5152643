use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::two_factor::{TwoFactorChallenge, TwoFactorMethod};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence for email/SMS one-time codes.
///
/// Attempt counting and the used flag are single conditional updates so two concurrent
/// guesses cannot both observe a count below the cap.
#[async_trait::async_trait]
pub trait ChallengeRepository: Send + Sync {
    async fn insert_challenge(&self, challenge: &TwoFactorChallenge) -> Result<(), AppError>;

    /// Increment the attempt counter and return the row as it is after the increment.
    async fn register_attempt(&self, challenge_id: &Uuid) -> Result<Option<TwoFactorChallenge>, AppError>;

    /// Flip `is_used` from false to true. Returns `false` if another caller got there first.
    async fn mark_used(&self, challenge_id: &Uuid, used_at: DateTime<Utc>, max_attempts: i32) -> Result<bool, AppError>;

    /// Newest unused, unexpired challenge for the user and method.
    async fn latest_challenge(&self, user_id: &Uuid, method: TwoFactorMethod, now: DateTime<Utc>) -> Result<Option<TwoFactorChallenge>, AppError>;

    async fn delete_stale_challenges(&self, before: DateTime<Utc>) -> Result<u64, AppError>;
}

#[derive(Debug, sqlx::FromRow)]
struct ChallengeRow {
    id: Uuid,
    tenant_id: Uuid,
    user_id: Uuid,
    code: String,
    method: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_used: bool,
    attempts: i32,
    used_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChallengeRow> for TwoFactorChallenge {
    type Error = AppError;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        let method = row.method.parse().map_err(AppError::Internal)?;
        Ok(TwoFactorChallenge {
            id: row.id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            code: row.code,
            method,
            created_at: row.created_at,
            expires_at: row.expires_at,
            is_used: row.is_used,
            attempts: row.attempts,
            used_at: row.used_at,
        })
    }
}

const CHALLENGE_COLUMNS: &str = "id, tenant_id, user_id, code, method, created_at, expires_at, is_used, attempts, used_at";

#[async_trait::async_trait]
impl ChallengeRepository for PostgresRepository {
    async fn insert_challenge(&self, challenge: &TwoFactorChallenge) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO two_factor_challenges (id, tenant_id, user_id, code, method, created_at, expires_at, is_used, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, 0)
            "#,
        )
        .bind(challenge.id)
        .bind(challenge.tenant_id)
        .bind(challenge.user_id)
        .bind(&challenge.code)
        .bind(challenge.method.as_str())
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn register_attempt(&self, challenge_id: &Uuid) -> Result<Option<TwoFactorChallenge>, AppError> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            "UPDATE two_factor_challenges SET attempts = attempts + 1 WHERE id = $1 RETURNING {}",
            CHALLENGE_COLUMNS
        ))
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TwoFactorChallenge::try_from).transpose()
    }

    async fn mark_used(&self, challenge_id: &Uuid, used_at: DateTime<Utc>, max_attempts: i32) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE two_factor_challenges
            SET is_used = true, used_at = $2
            WHERE id = $1 AND is_used = false AND expires_at >= $2 AND attempts <= $3
            "#,
        )
        .bind(challenge_id)
        .bind(used_at)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_challenge(&self, user_id: &Uuid, method: TwoFactorMethod, now: DateTime<Utc>) -> Result<Option<TwoFactorChallenge>, AppError> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            r#"
            SELECT {} FROM two_factor_challenges
            WHERE user_id = $1 AND method = $2 AND is_used = false AND expires_at >= $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            CHALLENGE_COLUMNS
        ))
        .bind(user_id)
        .bind(method.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TwoFactorChallenge::try_from).transpose()
    }

    async fn delete_stale_challenges(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM two_factor_challenges WHERE expires_at < $1 OR (is_used = true AND used_at < $1)")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
