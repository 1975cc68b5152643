use crate::error::app_error::AppError;
use crate::models::device::DeviceFingerprint;
use crate::models::session::SessionRecord;
use crate::models::token::SessionClaims;
use crate::service::session::SessionService;
use rocket::http::Status;
use rocket::outcome::Outcome;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use uuid::Uuid;

/// A request whose bearer token maps to a live session that passed security validation.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub claims: SessionClaims,
    pub session: SessionRecord,
    pub fingerprint: DeviceFingerprint,
}

impl AuthenticatedSession {
    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.session.permissions.iter().any(|p| p == permission)
    }
}

pub(crate) fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedSession {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let Some(token) = req.headers().get_one("Authorization").and_then(parse_bearer) else {
            return Outcome::Error((Status::Unauthorized, AppError::Unauthorized));
        };

        let sessions = match req.rocket().state::<SessionService>() {
            Some(sessions) => sessions,
            None => return Outcome::Error((Status::InternalServerError, AppError::Internal("Session service not configured".to_string()))),
        };

        let fingerprint = match req.guard::<DeviceFingerprint>().await {
            Outcome::Success(fingerprint) => fingerprint,
            _ => return Outcome::Error((Status::Unauthorized, AppError::Unauthorized)),
        };

        match sessions.authenticate(token, &fingerprint).await {
            Ok((claims, session)) => {
                let authenticated = AuthenticatedSession {
                    user_id: claims.user_id,
                    tenant_id: claims.tenant_id,
                    claims,
                    session,
                    fingerprint,
                };
                req.local_cache(|| Some(authenticated.clone()));
                Outcome::Success(authenticated)
            }
            Err(err) => Outcome::Error((Status::from(&err), err)),
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AuthenticatedSession {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Bearer access token. Obtain one via POST /auth/login.".to_string()),
            data: SecuritySchemeData::Http {
                scheme: "bearer".to_string(),
                bearer_format: Some("JWT".to_string()),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("bearerAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("bearerAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - session invalid or expired".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bearer;

    #[test]
    fn parse_bearer_valid() {
        assert_eq!(parse_bearer("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(parse_bearer("bearer   abc"), Some("abc"));
    }

    #[test]
    fn parse_bearer_wrong_scheme() {
        assert!(parse_bearer("Basic dXNlcjpwYXNz").is_none());
    }

    #[test]
    fn parse_bearer_missing_token() {
        assert!(parse_bearer("Bearer").is_none());
        assert!(parse_bearer("Bearer   ").is_none());
    }
}
