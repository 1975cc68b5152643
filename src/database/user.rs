use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::two_factor::TwoFactorMethod;
use crate::models::user::{User, UserAccess};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::LazyLock;
use uuid::Uuid;

/// A real Argon2 hash generated once at startup, used as a timing decoy
/// so that login requests for unknown emails cost the same as real ones.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| hash_password("dummy-never-matches").unwrap_or_default());

/// User lookups and the user columns owned by the session engine.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError>;
    async fn load_access(&self, user: &User) -> Result<UserAccess, AppError>;
    async fn record_failed_login(&self, user_id: &Uuid) -> Result<(), AppError>;
    async fn record_successful_login(&self, user_id: &Uuid) -> Result<(), AppError>;
    /// Overwrites the stored refresh token; `None` clears it.
    async fn update_refresh_token(&self, user_id: &Uuid, token_hash: Option<&str>, expires_at: Option<DateTime<Utc>>) -> Result<(), AppError>;
    /// Swaps the refresh token only while `expected_hash` is still current and unexpired at `now`.
    /// Returns false when another rotation got there first.
    async fn rotate_refresh_token(
        &self,
        user_id: &Uuid,
        expected_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    async fn store_totp_secret(&self, user_id: &Uuid, encrypted_secret: &str, nonce: &str) -> Result<(), AppError>;
    async fn enable_two_factor(&self, user_id: &Uuid, method: TwoFactorMethod) -> Result<(), AppError>;
    /// Turns 2FA off and drops any stored TOTP secret.
    async fn disable_two_factor(&self, user_id: &Uuid) -> Result<(), AppError>;
    async fn update_password_hash(&self, user_id: &Uuid, password_hash: &str) -> Result<(), AppError>;
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Black-box verify. A missing user still pays for one Argon2 verification.
pub fn verify_password(user: Option<&User>, password: &str) -> Result<bool, AppError> {
    let stored = user.map(|u| u.password_hash.as_str()).unwrap_or(DUMMY_HASH.as_str());
    let parsed = PasswordHash::new(stored).map_err(|e| AppError::password_hash("Failed to parse stored password hash", e))?;
    let matches = Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok();
    Ok(matches && user.is_some())
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    tenant_id: Uuid,
    email: String,
    name: String,
    phone_number: Option<String>,
    password_hash: String,
    is_active: bool,
    company_id: Option<Uuid>,
    two_factor_enabled: bool,
    two_factor_method: Option<String>,
    totp_secret_encrypted: Option<String>,
    totp_secret_nonce: Option<String>,
    refresh_token_hash: Option<String>,
    refresh_token_expires_at: Option<DateTime<Utc>>,
    failed_login_count: i32,
    last_login_at: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let two_factor_method = row.two_factor_method.as_deref().and_then(|m| match m.parse() {
            Ok(method) => Some(method),
            Err(e) => {
                tracing::warn!(user_id = %row.id, "ignoring stored two-factor method: {}", e);
                None
            }
        });

        User {
            id: row.id,
            tenant_id: row.tenant_id,
            email: row.email,
            name: row.name,
            phone_number: row.phone_number,
            password_hash: row.password_hash,
            is_active: row.is_active,
            company_id: row.company_id,
            two_factor_enabled: row.two_factor_enabled,
            two_factor_method,
            totp_secret_encrypted: row.totp_secret_encrypted,
            totp_secret_nonce: row.totp_secret_nonce,
            refresh_token_hash: row.refresh_token_hash,
            refresh_token_expires_at: row.refresh_token_expires_at,
            failed_login_count: row.failed_login_count,
            last_login_at: row.last_login_at,
        }
    }
}

const USER_COLUMNS: &str = r#"
    id, tenant_id, email, name, phone_number, password_hash, is_active, company_id,
    two_factor_enabled, two_factor_method, totp_secret_encrypted, totp_secret_nonce,
    refresh_token_hash, refresh_token_expires_at, failed_login_count, last_login_at
"#;

#[async_trait::async_trait]
impl CredentialStore for PostgresRepository {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE lower(email) = lower($1)", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    async fn find_user_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    async fn load_access(&self, user: &User) -> Result<UserAccess, AppError> {
        let tenant_roles = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT role_name FROM user_roles
            WHERE user_id = $1 AND tenant_id = $2 AND company_id IS NULL
            ORDER BY role_name
            "#,
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let company_roles = match user.company_id {
            Some(company_id) => {
                sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT DISTINCT role_name FROM user_roles
                    WHERE user_id = $1 AND tenant_id = $2 AND company_id = $3
                    ORDER BY role_name
                    "#,
                )
                .bind(user.id)
                .bind(user.tenant_id)
                .bind(company_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => Vec::new(),
        };

        let permissions = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT rp.permission_name
            FROM role_permissions rp
            JOIN user_roles ur ON ur.role_name = rp.role_name AND ur.tenant_id = rp.tenant_id
            WHERE ur.user_id = $1
              AND ur.tenant_id = $2
              AND (ur.company_id IS NULL OR ur.company_id = $3)
            ORDER BY rp.permission_name
            "#,
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .bind(user.company_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(UserAccess {
            tenant_roles,
            company_roles,
            permissions,
        })
    }

    async fn record_failed_login(&self, user_id: &Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_count = failed_login_count + 1, last_failed_login_at = now()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_successful_login(&self, user_id: &Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET failed_login_count = 0, last_login_at = now() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_refresh_token(&self, user_id: &Uuid, token_hash: Option<&str>, expires_at: Option<DateTime<Utc>>) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET refresh_token_hash = $2, refresh_token_expires_at = $3 WHERE id = $1")
            .bind(user_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: &Uuid,
        expected_hash: &str,
        new_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token_hash = $3, refresh_token_expires_at = $4
            WHERE id = $1 AND refresh_token_hash = $2 AND refresh_token_expires_at > $5
            "#,
        )
        .bind(user_id)
        .bind(expected_hash)
        .bind(new_hash)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn store_totp_secret(&self, user_id: &Uuid, encrypted_secret: &str, nonce: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET totp_secret_encrypted = $2, totp_secret_nonce = $3 WHERE id = $1")
            .bind(user_id)
            .bind(encrypted_secret)
            .bind(nonce)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn enable_two_factor(&self, user_id: &Uuid, method: TwoFactorMethod) -> Result<(), AppError> {
        // Switching away from TOTP must not leave a dormant secret behind.
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_enabled = true,
                two_factor_method = $2,
                totp_secret_encrypted = CASE WHEN $2 = 'totp' THEN totp_secret_encrypted ELSE NULL END,
                totp_secret_nonce = CASE WHEN $2 = 'totp' THEN totp_secret_nonce ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(method.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn disable_two_factor(&self, user_id: &Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET two_factor_enabled = false, two_factor_method = NULL,
                totp_secret_encrypted = NULL, totp_secret_nonce = NULL
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_password_hash(&self, user_id: &Uuid, password_hash: &str) -> Result<(), AppError> {
        // A new password also invalidates the outstanding refresh token.
        sqlx::query("UPDATE users SET password_hash = $2, refresh_token_hash = NULL, refresh_token_expires_at = NULL WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
