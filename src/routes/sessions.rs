use crate::auth::AuthenticatedSession;
use crate::database::session_history::{SessionHistoryRepository, SessionHistoryView};
use crate::error::app_error::AppError;
use crate::models::session::{AdminRevokeRequest, RevokedSessionsResponse, SessionSummary};
use crate::models::session_history::SessionAction;
use crate::service::auth::AuthService;
use crate::service::session::{Revocation, SessionService};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_okapi::openapi;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

/// Permission that lets a tenant administrator end another user's sessions.
pub const REVOKE_SESSIONS_PERMISSION: &str = "sessions.revoke";

/// List the active sessions of the current user
#[openapi(tag = "Sessions")]
#[get("/")]
pub async fn list_sessions(sessions: &State<SessionService>, current: AuthenticatedSession) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let active = sessions.list_active_sessions(&current.user_id).await?;
    Ok(Json(active.iter().map(|s| SessionSummary::from_record(s, current.session_id())).collect()))
}

/// Revoke one of the current user's sessions
#[openapi(tag = "Sessions")]
#[delete("/<id>")]
pub async fn delete_session(sessions: &State<SessionService>, current: AuthenticatedSession, id: &str) -> Result<Status, AppError> {
    // Someone else's session id reads the same as a missing one.
    let owned = sessions.get_session(id).await?.is_some_and(|s| s.user_id == current.user_id);
    if !owned {
        return Err(AppError::NotFound("Session not found".to_string()));
    }

    let revocation = Revocation {
        action: SessionAction::Logout,
        revoked_by: Some(current.user_id),
        reason: None,
    };
    sessions.revoke_session(id, revocation, Some(&current.fingerprint)).await?;
    Ok(Status::NoContent)
}

/// Session history of the current user, newest first
#[openapi(tag = "Sessions")]
#[get("/history?<limit>")]
pub async fn list_history(
    history: &State<Arc<dyn SessionHistoryRepository>>,
    current: AuthenticatedSession,
    limit: Option<i64>,
) -> Result<Json<Vec<SessionHistoryView>>, AppError> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(history.list_history(&current.tenant_id, &current.user_id, limit).await?))
}

/// Revoke every session of a user in the same tenant (administrators)
#[openapi(tag = "Sessions")]
#[post("/users/<user_id>/revoke", data = "<payload>")]
pub async fn revoke_user_sessions(
    sessions: &State<SessionService>,
    auth: &State<AuthService>,
    current: AuthenticatedSession,
    user_id: &str,
    payload: Option<Json<AdminRevokeRequest>>,
) -> Result<Json<RevokedSessionsResponse>, AppError> {
    if !current.has_permission(REVOKE_SESSIONS_PERMISSION) {
        return Err(AppError::Forbidden);
    }

    let target_id = Uuid::parse_str(user_id).map_err(|e| AppError::uuid("Invalid user id", e))?;
    let target = auth.find_user(&target_id).await?;
    if target.tenant_id != current.tenant_id {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let request = payload.map(Json::into_inner).unwrap_or_default();
    request.validate()?;

    let revocation = Revocation {
        action: SessionAction::RevokedByAdmin,
        revoked_by: Some(current.user_id),
        reason: request.reason.as_deref(),
    };
    let revoked = sessions.revoke_all_sessions(target.tenant_id, target.id, revocation, None).await?;

    tracing::info!(admin_id = %current.user_id, user_id = %target.id, revoked = revoked.len(), "sessions revoked by administrator");
    Ok(Json(RevokedSessionsResponse { revoked: revoked.len() }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![list_sessions, delete_session, list_history, revoke_user_sessions]
}

#[cfg(test)]
mod tests {
    use crate::models::session_history::SessionAction;
    use crate::models::user::{User, UserAccess};
    use crate::test_utils::{SAMPLE_PASSWORD, TestApp, sample_user};
    use rocket::http::{ContentType, Header, Status};
    use serde_json::Value;

    const BROWSER: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15";
    const IP: &str = "192.0.2.44";

    async fn bearer_for(app: &TestApp, user: &User) -> String {
        let response = app
            .client
            .post("/api/v1/auth/login")
            .header(ContentType::JSON)
            .header(Header::new("User-Agent", BROWSER))
            .header(Header::new("X-Forwarded-For", IP))
            .body(serde_json::json!({ "email": user.email, "password": SAMPLE_PASSWORD }).to_string())
            .dispatch()
            .await;
        let body = response.into_json::<Value>().await.unwrap();
        format!("Bearer {}", body["access_token"].as_str().unwrap())
    }

    async fn get(app: &TestApp, uri: &str, bearer: &str) -> (Status, Value) {
        let response = app
            .client
            .get(uri.to_string())
            .header(Header::new("Authorization", bearer.to_string()))
            .header(Header::new("User-Agent", BROWSER))
            .header(Header::new("X-Forwarded-For", IP))
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json::<Value>().await.unwrap_or(Value::Null))
    }

    #[rocket::async_test]
    async fn list_marks_current_session() {
        let user = sample_user();
        let app = TestApp::with_user(user.clone()).await;
        let first = bearer_for(&app, &user).await;
        bearer_for(&app, &user).await;

        let (status, body) = get(&app, "/api/v1/sessions", &first).await;
        assert_eq!(status, Status::Ok);
        let sessions = body.as_array().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions.iter().filter(|s| s["current"] == true).count(), 1);
        assert_eq!(sessions[0]["browser"], "Safari");
    }

    #[rocket::async_test]
    async fn delete_unknown_session_is_not_found() {
        let user = sample_user();
        let app = TestApp::with_user(user.clone()).await;
        let bearer = bearer_for(&app, &user).await;

        let response = app
            .client
            .delete("/api/v1/sessions/does-not-exist")
            .header(Header::new("Authorization", bearer))
            .header(Header::new("User-Agent", BROWSER))
            .header(Header::new("X-Forwarded-For", IP))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn history_lists_login() {
        let user = sample_user();
        let app = TestApp::with_user(user.clone()).await;
        let bearer = bearer_for(&app, &user).await;

        let (status, body) = get(&app, "/api/v1/sessions/history?limit=10", &bearer).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body[0]["action"], SessionAction::Login.as_str());
    }

    #[rocket::async_test]
    async fn admin_revoke_requires_permission() {
        let user = sample_user();
        let app = TestApp::with_user(user.clone()).await;
        let bearer = bearer_for(&app, &user).await;

        let response = app
            .client
            .post(format!("/api/v1/sessions/users/{}/revoke", user.id))
            .header(Header::new("Authorization", bearer))
            .header(Header::new("User-Agent", BROWSER))
            .header(Header::new("X-Forwarded-For", IP))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn admin_revokes_user_in_same_tenant() {
        let admin = User {
            email: "admin@example.com".to_string(),
            ..sample_user()
        };
        let member = User {
            tenant_id: admin.tenant_id,
            ..sample_user()
        };
        let app = TestApp::with_user(admin.clone()).await;
        app.credentials.insert(member.clone());
        app.credentials.set_access(UserAccess {
            permissions: vec![super::REVOKE_SESSIONS_PERMISSION.to_string()],
            ..UserAccess::default()
        });

        bearer_for(&app, &member).await;
        let admin_bearer = bearer_for(&app, &admin).await;

        let response = app
            .client
            .post(format!("/api/v1/sessions/users/{}/revoke", member.id))
            .header(ContentType::JSON)
            .header(Header::new("Authorization", admin_bearer))
            .header(Header::new("User-Agent", BROWSER))
            .header(Header::new("X-Forwarded-For", IP))
            .body(serde_json::json!({ "reason": "offboarding" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_json::<Value>().await.unwrap();
        assert_eq!(body["revoked"], 1);

        let entry = app.history.entries().pop().unwrap();
        assert_eq!(entry.action, SessionAction::RevokedByAdmin);
        assert_eq!(entry.revoked_by, Some(admin.id));
    }
}
