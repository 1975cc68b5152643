use crate::auth::AuthenticatedSession;
use crate::models::device::DeviceFingerprint;
use crate::service::fingerprint::{TrustedProxies, resolve_fingerprint};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::convert::Infallible;
use tracing::{info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Request ID that is attached to every request for tracking
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }

    /// Keeps an upstream id when it is a UUID, otherwise mints a new one.
    pub fn from_upstream(value: Option<&str>) -> Self {
        match value.map(str::trim).and_then(|v| Uuid::parse_str(v).ok()) {
            Some(id) => RequestId(id.to_string()),
            None => RequestId::new(),
        }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequestId {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Some(request_id) = request.local_cache(|| None::<RequestId>).as_ref() {
            return Outcome::Success(request_id.clone());
        }

        Outcome::Success(RequestId::new())
    }
}

/// Fairing that tags every request with an id, logs it, and marks responses uncacheable
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let request_id = RequestId::from_upstream(request.headers().get_one(REQUEST_ID_HEADER));

        request.local_cache(|| Some(request_id.clone()));

        info!(
            request_id = %request_id.0,
            method = %request.method(),
            uri = %request.uri(),
            "incoming request"
        );
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let request_id = request
            .local_cache(|| None::<RequestId>)
            .as_ref()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let user_id = request
            .local_cache(|| None::<AuthenticatedSession>)
            .as_ref()
            .map(|s| s.user_id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());

        let status = response.status();

        response.set_header(Header::new(REQUEST_ID_HEADER, request_id.clone()));

        // Tokens and session listings must never be cached by intermediaries.
        response.set_header(Header::new("Cache-Control", "no-store"));
        response.set_header(Header::new("Pragma", "no-cache"));
        response.set_header(Header::new("X-Content-Type-Options", "nosniff"));

        if status.class().is_server_error() || status.class().is_client_error() {
            warn!(
                request_id = %request_id,
                user_id = %user_id,
                method = %request.method(),
                uri = %request.uri(),
                status = %status.code,
                "request completed with error"
            );
        } else {
            info!(
                request_id = %request_id,
                user_id = %user_id,
                method = %request.method(),
                uri = %request.uri(),
                status = %status.code,
                "request completed"
            );
        }
    }
}

/// Fingerprint of the calling device, resolved once per request.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for DeviceFingerprint {
    type Error = Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Infallible> {
        let fingerprint = req.local_cache(|| {
            let no_proxies = TrustedProxies::default();
            let trusted = req.rocket().state::<TrustedProxies>().unwrap_or(&no_proxies);
            resolve_fingerprint(req.headers(), req.remote().map(|addr| addr.ip()), trusted)
        });
        Outcome::Success(fingerprint.clone())
    }
}

impl<'a> OpenApiFromRequest<'a> for DeviceFingerprint {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_uuids() {
        let id1 = RequestId::new();
        let id2 = RequestId::default();
        assert!(Uuid::parse_str(&id1.0).is_ok());
        assert_ne!(id1.0, id2.0);
    }

    #[test]
    fn upstream_uuid_is_kept() {
        let upstream = Uuid::new_v4().to_string();
        assert_eq!(RequestId::from_upstream(Some(&upstream)).0, upstream);
    }

    #[test]
    fn upstream_garbage_is_replaced() {
        let id = RequestId::from_upstream(Some("<script>"));
        assert!(Uuid::parse_str(&id.0).is_ok());
        assert!(Uuid::parse_str(&RequestId::from_upstream(None).0).is_ok());
    }
}
