use crate::config::DatabaseConfig;
use rocket::fairing::AdHoc;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub async fn init_pool(db_config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    // Bounded statements keep a stalled database from holding a login open.
    let connect_options =
        PgConnectOptions::from_str(&db_config.url)?.options([("statement_timeout", format!("{}ms", db_config.statement_timeout_ms))]);

    PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(Duration::from_secs(db_config.acquire_timeout))
        .idle_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(connect_options)
        .await
}

pub fn stage_db(db_config: DatabaseConfig) -> AdHoc {
    AdHoc::try_on_ignite("Postgres (sqlx)", |rocket| async move {
        let pool = match init_pool(&db_config).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!("Failed to initialize database pool: {}", e);
                return Err(rocket);
            }
        };

        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            tracing::error!("Failed to apply database migrations: {}", e);
            return Err(rocket);
        }

        tracing::info!("Database pool initialized successfully");
        Ok(rocket.manage(pool))
    })
}
