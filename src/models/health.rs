use rocket::serde::Serialize;
use schemars::JsonSchema;

#[derive(Serialize, JsonSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: &'static str,
}

impl HealthResponse {
    pub fn from_checks(database_ok: bool, cache_ok: bool) -> Self {
        let label = |ok: bool| if ok { "up" } else { "down" };
        Self {
            status: if database_ok && cache_ok { "ok" } else { "degraded" },
            database: label(database_ok),
            cache: label(cache_ok),
        }
    }
}
