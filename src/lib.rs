mod auth;
mod cache;
mod config;
mod cron_tasks;
mod database;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use cron_tasks::{PurgeChallengesResult, purge_stale_challenges};

use crate::cache::{SharedCache, stage_cache};
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session_history::SessionHistoryRepository;
use crate::database::two_factor::ChallengeRepository;
use crate::database::user::CredentialStore;
use crate::db::stage_db;
use crate::error::app_error::AppError;
use crate::middleware::RequestLogger;
use crate::routes as app_routes;
use crate::service::auth::AuthService;
use crate::service::challenge::{ChallengeService, CodeDelivery, MessageTransports};
use crate::service::email::EmailService;
use crate::service::fingerprint::TrustedProxies;
use crate::service::security::SecurityValidator;
use crate::service::session::{SessionPolicy, SessionService};
use crate::service::session_history::SessionHistoryRecorder;
use crate::service::session_store::SessionStore;
use crate::service::sms::SmsService;
use crate::service::token::TokenIssuer;
use crate::service::two_factor::TwoFactorService;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, catchers, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use sqlx::PgPool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG overrides the configured level, e.g.
    //   RUST_LOG=info,tenant_auth::service::session=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // A second build in the same process keeps the first subscriber.
    let _ = if json_format {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
}

fn build_cors(cors_config: &config::CorsConfig) -> Result<CorsOptions, AppError> {
    let is_wildcard = cors_config.allowed_origins.len() == 1 && cors_config.allowed_origins[0] == "*";

    if is_wildcard && cors_config.allow_credentials {
        return Err(AppError::Internal(
            "Invalid CORS configuration: wildcard origins (*) cannot be combined with credentials".to_string(),
        ));
    }

    let allowed_origins = if cors_config.allowed_origins.is_empty() {
        AllowedOrigins::some_exact::<&str>(&[])
    } else if is_wildcard {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&cors_config.allowed_origins.iter().map(String::as_str).collect::<Vec<_>>())
    };

    Ok(CorsOptions {
        allowed_origins,
        allowed_methods: vec![Method::Get, Method::Post, Method::Delete, Method::Options, Method::Head]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: rocket_cors::AllowedHeaders::some(&[
            "Content-Type",
            "Authorization",
            "Accept",
            "X-Request-Id",
            "X-Device-Fingerprint",
        ]),
        expose_headers: ["X-Request-Id".to_string()].into_iter().collect(),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    })
}

fn get_swagger_config(openapi_url: &str) -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: openapi_url.to_string(),
        ..Default::default()
    }
}

fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return config::DEFAULT_API_BASE_PATH.to_string();
    }

    let mut normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };

    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }

    normalized
}

fn join_base_path(base_path: &str, path: &str) -> String {
    let base = base_path.trim_end_matches('/');
    let suffix = path.trim_start_matches('/');

    if base.is_empty() {
        format!("/{}", suffix)
    } else {
        format!("{}/{}", base, suffix)
    }
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

fn collect_route_specs() -> Vec<RouteSpec> {
    let (auth_routes, auth_openapi) = app_routes::auth::routes();
    let (session_routes, session_openapi) = app_routes::sessions::routes();
    let (two_factor_routes, two_factor_openapi) = app_routes::two_factor::routes();

    vec![
        RouteSpec {
            path: "/auth",
            routes: auth_routes,
            openapi: auth_openapi,
        },
        RouteSpec {
            path: "/sessions",
            routes: session_routes,
            openapi: session_openapi,
        },
        RouteSpec {
            path: "/two-factor",
            routes: two_factor_routes,
            openapi: two_factor_openapi,
        },
    ]
}

/// Mounts every API route plus the health check and catchers under the configured base path.
pub(crate) fn mount_api_routes(mut rocket: Rocket<Build>, api_config: &config::ApiConfig) -> Result<Rocket<Build>, AppError> {
    let base_path = normalize_base_path(&api_config.base_path);
    let route_specs = collect_route_specs();

    if api_config.enable_swagger {
        let mut openapi_list = Vec::new();
        for spec in route_specs {
            rocket = rocket.mount(join_base_path(&base_path, spec.path), spec.routes);
            openapi_list.push((spec.path, spec.openapi));
        }

        let openapi_docs = marge_spec_list(&openapi_list).map_err(|e| AppError::Internal(format!("Could not merge OpenAPI spec: {}", e)))?;

        let settings = rocket_okapi::settings::OpenApiSettings::default();
        rocket = rocket.mount(base_path.as_str(), vec![get_openapi_route(openapi_docs, &settings)]);

        let docs_path = join_base_path(&base_path, "docs");
        let openapi_url = join_base_path(&base_path, "openapi.json");
        rocket = rocket.mount(docs_path, make_swagger_ui(&get_swagger_config(&openapi_url)));
    } else {
        for spec in route_specs {
            rocket = rocket.mount(join_base_path(&base_path, spec.path), spec.routes);
        }
    }

    Ok(rocket.mount(join_base_path(&base_path, "health"), app_routes::health::routes()).register(
        base_path.as_str(),
        catchers![
            app_routes::error::unauthorized,
            app_routes::error::not_found,
            app_routes::error::unprocessable,
            app_routes::error::too_many_requests
        ],
    ))
}

/// The services request handlers reach through managed state.
#[derive(Clone)]
pub(crate) struct Services {
    pub sessions: SessionService,
    pub auth: AuthService,
    pub two_factor: TwoFactorService,
    pub history: Arc<dyn SessionHistoryRepository>,
    pub trusted_proxies: TrustedProxies,
}

impl Services {
    pub fn build(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        challenge_repo: Arc<dyn ChallengeRepository>,
        history: Arc<dyn SessionHistoryRepository>,
        delivery: Arc<dyn CodeDelivery>,
        cache: SharedCache,
    ) -> Result<Self, AppError> {
        let sessions = SessionService::new(
            SessionStore::new(cache.clone(), chrono::Duration::hours(config.session.index_grace_hours)),
            SecurityValidator::new(config.session.max_travel_speed_kmh),
            TokenIssuer::new(&config.token),
            SessionHistoryRecorder::new(history.clone()),
            credentials.clone(),
            SessionPolicy::from(&config.session),
        );

        let challenges = ChallengeService::new(
            challenge_repo,
            delivery,
            chrono::Duration::minutes(config.two_factor.challenge_ttl_minutes),
            config.two_factor.max_attempts,
        );
        let two_factor = TwoFactorService::new(credentials.clone(), challenges, &config.two_factor)?;
        let auth = AuthService::new(credentials, sessions.clone(), two_factor.clone(), cache, config);

        Ok(Self {
            sessions,
            auth,
            two_factor,
            history,
            trusted_proxies: TrustedProxies::parse(&config.server.trusted_proxies)?,
        })
    }

    pub fn manage(self, rocket: Rocket<Build>) -> Rocket<Build> {
        rocket
            .manage(self.sessions)
            .manage(self.auth)
            .manage(self.two_factor)
            .manage(self.history)
            .manage(self.trusted_proxies)
    }
}

fn stage_services(config: Config) -> AdHoc {
    AdHoc::try_on_ignite("Session services", |rocket| async move {
        let (Some(pool), Some(cache)) = (rocket.state::<PgPool>().cloned(), rocket.state::<SharedCache>().cloned()) else {
            tracing::error!("Session services need the database pool and the session cache");
            return Err(rocket);
        };

        let transports = match SmsService::new(config.sms.clone()) {
            Ok(sms) => MessageTransports {
                email: EmailService::new(config.email.clone()),
                sms,
            },
            Err(e) => {
                tracing::error!("Failed to build SMS transport: {}", e);
                return Err(rocket);
            }
        };

        let repo = Arc::new(PostgresRepository { pool });
        match Services::build(&config, repo.clone(), repo.clone(), repo, Arc::new(transports), cache) {
            Ok(services) => {
                tracing::info!("Session services initialized");
                Ok(services.manage(rocket))
            }
            Err(e) => {
                tracing::error!("Failed to initialize session services: {}", e);
                Err(rocket)
            }
        }
    })
}

pub fn build_rocket(config: Config) -> Result<Rocket<Build>, AppError> {
    init_tracing(&config.logging.level, config.logging.json_format);

    let cors = build_cors(&config.cors)?
        .to_cors()
        .map_err(|e| AppError::Internal(format!("Failed to create CORS fairing: {}", e)))?;

    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    let rocket = rocket::custom(figment)
        .attach(cors)
        .attach(RequestLogger)
        .attach(stage_db(config.database.clone()))
        .attach(stage_cache(config.cache.clone()))
        .attach(stage_services(config.clone()));

    mount_api_routes(rocket, &config.api)
}
