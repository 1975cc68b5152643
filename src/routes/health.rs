use crate::cache::SharedCache;
use crate::models::health::HealthResponse;
use rocket::serde::json::Json;
use rocket::{State, http::Status, routes};
use sqlx::PgPool;

/// Reports database and session-store reachability. 503 while either is down.
#[rocket::get("/")]
pub async fn healthcheck(pool: &State<PgPool>, cache: &State<SharedCache>) -> (Status, Json<HealthResponse>) {
    let database_ok = sqlx::query("SELECT 1").execute(pool.inner()).await.is_ok();
    let cache_ok = cache.ping().await.is_ok();
    if !database_ok || !cache_ok {
        tracing::warn!(database_ok, cache_ok, "health check degraded");
    }

    let response = HealthResponse::from_checks(database_ok, cache_ok);
    let status = if database_ok && cache_ok { Status::Ok } else { Status::ServiceUnavailable };
    (status, Json(response))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![healthcheck]
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{TestApp, sample_user};
    use rocket::http::Status;
    use serde_json::Value;

    #[rocket::async_test]
    async fn unreachable_database_reports_degraded() {
        let app = TestApp::with_user(sample_user()).await;
        let response = app.client.get("/api/v1/health").dispatch().await;
        assert_eq!(response.status(), Status::ServiceUnavailable);
        let body = response.into_json::<Value>().await.unwrap();
        assert_eq!(body["database"], "down");
        assert_eq!(body["cache"], "up");
    }
}
