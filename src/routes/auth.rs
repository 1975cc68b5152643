use crate::auth::AuthenticatedSession;
use crate::error::app_error::AppError;
use crate::models::device::DeviceFingerprint;
use crate::models::session::RevokedSessionsResponse;
use crate::models::session_history::SessionAction;
use crate::models::token::{RefreshRequest, TokenPair};
use crate::models::two_factor::{ChallengeIssuedResponse, ChallengeResendRequest};
use crate::models::user::{ChangePasswordRequest, LoginRequest, LoginResponse, TwoFactorLoginRequest};
use crate::service::auth::AuthService;
use crate::service::session::{Revocation, SessionService};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, post};
use rocket_okapi::openapi;
use validator::Validate;

/// Log in with email and password
///
/// Returns a token pair, or a pending token when a second factor is required.
#[openapi(tag = "Authentication")]
#[post("/login", data = "<payload>")]
pub async fn post_login(auth: &State<AuthService>, fingerprint: DeviceFingerprint, payload: Json<LoginRequest>) -> Result<Json<LoginResponse>, AppError> {
    payload.validate()?;
    let outcome = auth.login(&payload.email, &payload.password, &fingerprint).await?;
    Ok(Json(outcome.into()))
}

/// Finish a pending login with a TOTP or delivered code
#[openapi(tag = "Authentication")]
#[post("/two-factor", data = "<payload>")]
pub async fn post_two_factor(
    auth: &State<AuthService>,
    fingerprint: DeviceFingerprint,
    payload: Json<TwoFactorLoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    payload.validate()?;
    let outcome = auth.complete_two_factor(&payload.pending_token, &payload.code, &fingerprint).await?;
    Ok(Json(outcome.into()))
}

/// Send a new email/SMS code for a pending login
#[openapi(tag = "Authentication")]
#[post("/two-factor/resend", data = "<payload>")]
pub async fn post_two_factor_resend(auth: &State<AuthService>, payload: Json<ChallengeResendRequest>) -> Result<Json<ChallengeIssuedResponse>, AppError> {
    payload.validate()?;
    Ok(Json(auth.resend_challenge(&payload.pending_token).await?))
}

/// Exchange an expired access token and the refresh token for a new pair
///
/// The old session is revoked and the refresh token can not be used again.
#[openapi(tag = "Authentication")]
#[post("/refresh", data = "<payload>")]
pub async fn post_refresh(sessions: &State<SessionService>, fingerprint: DeviceFingerprint, payload: Json<RefreshRequest>) -> Result<Json<TokenPair>, AppError> {
    payload.validate()?;
    let (_, tokens) = sessions.refresh_tokens(&payload, &fingerprint).await?;
    Ok(Json(tokens))
}

/// End the current session
#[openapi(tag = "Authentication")]
#[post("/logout")]
pub async fn post_logout(sessions: &State<SessionService>, current: AuthenticatedSession) -> Result<Status, AppError> {
    sessions
        .revoke_session(current.session_id(), Revocation::by_owner(SessionAction::Logout), Some(&current.fingerprint))
        .await?;
    Ok(Status::NoContent)
}

/// End every session of the current user, on all devices
#[openapi(tag = "Authentication")]
#[post("/logout-all")]
pub async fn post_logout_all(sessions: &State<SessionService>, current: AuthenticatedSession) -> Result<Json<RevokedSessionsResponse>, AppError> {
    let revoked = sessions
        .revoke_all_sessions(
            current.tenant_id,
            current.user_id,
            Revocation::by_owner(SessionAction::LogoutAll),
            Some(&current.fingerprint),
        )
        .await?;
    Ok(Json(RevokedSessionsResponse { revoked: revoked.len() }))
}

/// Change the password; all sessions are revoked
#[openapi(tag = "Authentication")]
#[post("/password", data = "<payload>")]
pub async fn post_change_password(
    auth: &State<AuthService>,
    current: AuthenticatedSession,
    payload: Json<ChangePasswordRequest>,
) -> Result<Json<RevokedSessionsResponse>, AppError> {
    payload.validate()?;
    let revoked = auth
        .change_password(&current.session, &payload.current_password, &payload.new_password, &current.fingerprint)
        .await?;
    Ok(Json(RevokedSessionsResponse { revoked: revoked.len() }))
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        post_login,
        post_two_factor,
        post_two_factor_resend,
        post_refresh,
        post_logout,
        post_logout_all,
        post_change_password
    ]
}
