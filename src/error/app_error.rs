use rocket::http::Status;
use rocket::response::Responder;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use std::io::Cursor;
use thiserror::Error;
use tracing::{error, warn};
use validator::ValidationErrors;

/// Body returned for every session validation failure, whichever check tripped.
pub const SESSION_INVALID_MESSAGE: &str = "Session invalid or expired";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Expired: {0}")]
    Expired(String),
    #[error("Invalid: {0}")]
    Invalid(String),
    #[error("Too many attempts")]
    RateLimited,
    #[error("Session invalid or expired")]
    PolicyViolation(String),
    #[error("Service temporarily unavailable")]
    TransientIo { message: String },
    #[error("Internal server error")]
    Db {
        message: String,
        #[source]
        source: sqlx::error::Error,
    },
    #[error("Service temporarily unavailable")]
    Cache {
        message: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("Internal server error")]
    Serialization {
        message: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Forbidden")]
    Forbidden,
    #[error("Internal server error")]
    PasswordHash { message: String },
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal server error")]
    UuidError {
        message: String,
        #[source]
        source: uuid::Error,
    },
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationErrors),
    #[error("Internal server error")]
    ConfigurationError {
        message: String,
        #[source]
        source: figment::Error,
    },
    #[error("Failed to deliver verification code")]
    Delivery { message: String },
    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn db(message: impl Into<String>, source: sqlx::error::Error) -> Self {
        Self::Db {
            message: message.into(),
            source,
        }
    }

    pub fn cache(message: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Cache {
            message: message.into(),
            source,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo { message: message.into() }
    }

    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery { message: message.into() }
    }

    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source,
        }
    }

    pub fn uuid(message: impl Into<String>, source: uuid::Error) -> Self {
        Self::UuidError {
            message: message.into(),
            source,
        }
    }

    pub fn password_hash(message: impl Into<String>, source: password_hash::Error) -> Self {
        Self::PasswordHash {
            message: format!("{}: {}", message.into(), source),
        }
    }

    /// Store failures the caller must treat as "not authenticated" rather than retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientIo { .. } | AppError::Cache { .. } | AppError::Db { .. })
    }
}

impl From<password_hash::Error> for AppError {
    fn from(e: password_hash::Error) -> Self {
        AppError::password_hash("Password hashing failed", e)
    }
}

impl From<uuid::Error> for AppError {
    fn from(e: uuid::Error) -> Self {
        AppError::uuid("Invalid UUID", e)
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::NotFound(_) => Status::NotFound,
            AppError::Expired(_) => Status::Unauthorized,
            AppError::Invalid(_) => Status::BadRequest,
            AppError::RateLimited => Status::TooManyRequests,
            AppError::PolicyViolation(_) => Status::Unauthorized,
            AppError::TransientIo { .. } => Status::ServiceUnavailable,
            AppError::Db { .. } => Status::InternalServerError,
            AppError::Cache { .. } => Status::ServiceUnavailable,
            AppError::Serialization { .. } => Status::InternalServerError,
            AppError::Unauthorized => Status::Unauthorized,
            AppError::InvalidCredentials => Status::Unauthorized,
            AppError::Forbidden => Status::Forbidden,
            AppError::PasswordHash { .. } => Status::InternalServerError,
            AppError::BadRequest(_) => Status::BadRequest,
            AppError::UuidError { .. } => Status::BadRequest,
            AppError::ValidationError(_) => Status::BadRequest,
            AppError::ConfigurationError { .. } => Status::InternalServerError,
            AppError::Delivery { .. } => Status::ServiceUnavailable,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        let user_id = req
            .local_cache(|| None::<crate::auth::AuthenticatedSession>)
            .as_ref()
            .map(|s| s.user_id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());

        let status = Status::from(&self);
        if status.class().is_server_error() {
            error!(
                error = ?self,
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request failed"
            );
        } else {
            warn!(
                error = %self,
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request rejected"
            );
        }

        // Expiry and policy failures share one body so callers cannot tell which check failed.
        let body = match &self {
            AppError::Expired(_) | AppError::PolicyViolation(_) | AppError::Unauthorized => SESSION_INVALID_MESSAGE.to_string(),
            _ => self.to_string(),
        };

        Response::build().status(status).sized_body(body.len(), Cursor::new(body)).ok()
    }
}

impl OpenApiResponderInner for AppError {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Bad Request"),
            ("401", "Unauthorized - session invalid or expired"),
            ("403", "Forbidden"),
            ("404", "Not Found"),
            ("429", "Too Many Attempts"),
            ("500", "Internal Server Error"),
            ("503", "Session store unavailable"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::ConfigurationError {
            message: "Failed to read configuration".to_string(),
            source: e,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            sqlx::Error::PoolTimedOut => AppError::transient("Database pool timed out"),
            _ => AppError::db("Database error", e),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::cache("Cache error", e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::serialization("Failed to (de)serialize cached value", e)
    }
}
