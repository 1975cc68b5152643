use rocket::figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub cors: CorsConfig,
    pub session: SessionConfig,
    pub token: TokenConfig,
    pub two_factor: TwoFactorConfig,
    pub email: EmailConfig,
    pub sms: SmsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,
    pub acquire_timeout: u64,
    /// Upper bound for a single statement, in milliseconds.
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub key_prefix: String,
    /// Per-call timeout; a timed out call is treated as a failed validation.
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
    /// Reverse proxies allowed to set `X-Forwarded-For` / `X-Real-IP`.
    pub trusted_proxies: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub ttl_hours: i64,
    /// Extra lifetime given to a per-user index key beyond the session TTL.
    pub index_grace_hours: i64,
    pub max_travel_speed_kmh: f64,
    pub allow_ip_change: bool,
    pub allow_browser_change: bool,
    pub pending_two_factor_minutes: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    pub signing_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_minutes: i64,
    pub refresh_token_days: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwoFactorConfig {
    pub issuer_name: String,
    pub challenge_ttl_minutes: i64,
    pub max_attempts: i32,
    /// 64 hex characters (32 bytes) used to encrypt TOTP secrets at rest.
    pub encryption_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_address: String,
    pub from_name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SmsConfig {
    pub enabled: bool,
    pub gateway_url: String,
    pub api_key: String,
    pub sender: String,
    pub request_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/tenant_auth".to_string(),
            max_connections: 16,
            min_connections: 4,
            connection_timeout: 5,
            acquire_timeout: 5,
            statement_timeout_ms: 500,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "tenant_auth:".to_string(),
            operation_timeout_ms: 250,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
            trusted_proxies: vec!["127.0.0.1".to_string(), "::1".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            allow_credentials: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 8,
            index_grace_hours: 24,
            max_travel_speed_kmh: 1000.0,
            allow_ip_change: false,
            allow_browser_change: false,
            pending_two_factor_minutes: 5,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            signing_secret: "change-me-in-production-this-is-not-a-secret".to_string(),
            issuer: "tenant-auth".to_string(),
            audience: "tenant-auth-clients".to_string(),
            access_token_minutes: 15,
            refresh_token_days: 7,
        }
    }
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer_name: "TenantAuth".to_string(),
            challenge_ttl_minutes: 5,
            max_attempts: 5,
            encryption_key: "0".repeat(64),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from_address: "no-reply@localhost".to_string(),
            from_name: "TenantAuth".to_string(),
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_url: "http://localhost:9090/messages".to_string(),
            api_key: String::new(),
            sender: "TenantAuth".to_string(),
            request_timeout_ms: 3000,
        }
    }
}

impl TwoFactorConfig {
    pub fn parse_encryption_key(&self) -> Result<[u8; 32], String> {
        let bytes = hex::decode(self.encryption_key.trim()).map_err(|e| format!("Two-factor encryption key is not valid hex: {}", e))?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("Two-factor encryption key must be 32 bytes, got {}", b.len()))
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. TenantAuth.toml (base configuration file)
    /// 2. Environment variables (prefixed with TENANT_AUTH_)
    /// 3. DATABASE_URL and REDIS_URL environment variables
    pub fn load() -> Result<Self, figment::Error> {
        let defaults = toml::to_string(&Config::default()).map_err(|e| figment::Error::from(e.to_string()))?;

        let figment = Figment::new()
            .merge(Toml::string(&defaults))
            .merge(Toml::file("TenantAuth.toml"))
            // e.g. TENANT_AUTH_SESSION_TTL_HOURS is not splittable, so nested keys use double underscores:
            // TENANT_AUTH_SESSION__TTL_HOURS=12
            .merge(Env::prefixed("TENANT_AUTH_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "cache.url".into()));

        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_encryption_key_parses() {
        let config = TwoFactorConfig::default();
        assert_eq!(config.parse_encryption_key().unwrap(), [0u8; 32]);
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let config = TwoFactorConfig {
            encryption_key: "abcd".to_string(),
            ..TwoFactorConfig::default()
        };
        let err = config.parse_encryption_key().unwrap_err();
        assert!(err.contains("32 bytes"));
    }

    #[test]
    fn non_hex_encryption_key_is_rejected() {
        let config = TwoFactorConfig {
            encryption_key: "z".repeat(64),
            ..TwoFactorConfig::default()
        };
        assert!(config.parse_encryption_key().is_err());
    }

    #[test]
    fn session_defaults_match_policy() {
        let config = SessionConfig::default();
        assert_eq!(config.ttl_hours, 8);
        assert_eq!(config.max_travel_speed_kmh, 1000.0);
        assert!(!config.allow_ip_change);
        assert!(!config.allow_browser_change);
    }

    #[test]
    fn load_uses_defaults_without_file() {
        let config = Config::load().unwrap();
        assert_eq!(config.two_factor.max_attempts, 5);
        assert_eq!(config.cache.operation_timeout_ms, 250);
        assert_eq!(config.server.trusted_proxies, vec!["127.0.0.1", "::1"]);
    }
}
