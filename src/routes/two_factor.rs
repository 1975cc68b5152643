use crate::auth::AuthenticatedSession;
use crate::error::app_error::AppError;
use crate::models::two_factor::{
    ChallengeIssuedResponse, TotpSetupResponse, TwoFactorCodeRequest, TwoFactorConfirmRequest, TwoFactorDisableRequest, TwoFactorEnrollRequest,
    TwoFactorStatus,
};
use crate::service::auth::AuthService;
use crate::service::two_factor::TwoFactorService;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use validator::Validate;

/// Get the second factor configured for the current user
#[openapi(tag = "Two-Factor Authentication")]
#[get("/status")]
pub async fn get_two_factor_status(
    auth: &State<AuthService>,
    two_factor: &State<TwoFactorService>,
    current: AuthenticatedSession,
) -> Result<Json<TwoFactorStatus>, AppError> {
    let user = auth.find_user(&current.user_id).await?;
    Ok(Json(two_factor.status(&user)))
}

/// Generate a TOTP secret and QR code; 2FA stays off until `/totp/enable`
#[openapi(tag = "Two-Factor Authentication")]
#[post("/totp/setup")]
pub async fn setup_totp(
    auth: &State<AuthService>,
    two_factor: &State<TwoFactorService>,
    current: AuthenticatedSession,
) -> Result<Json<TotpSetupResponse>, AppError> {
    let user = auth.find_user(&current.user_id).await?;
    Ok(Json(two_factor.setup_totp(&user).await?))
}

/// Turn on TOTP with a code from the authenticator app
#[openapi(tag = "Two-Factor Authentication")]
#[post("/totp/enable", data = "<payload>")]
pub async fn enable_totp(
    auth: &State<AuthService>,
    two_factor: &State<TwoFactorService>,
    current: AuthenticatedSession,
    payload: Json<TwoFactorCodeRequest>,
) -> Result<Status, AppError> {
    payload.validate()?;
    let user = auth.find_user(&current.user_id).await?;
    two_factor.enable_totp(&user, &payload.code).await?;
    Ok(Status::NoContent)
}

/// Send a code by email or SMS to start enrolling that method
#[openapi(tag = "Two-Factor Authentication")]
#[post("/enroll", data = "<payload>")]
pub async fn start_enrollment(
    auth: &State<AuthService>,
    two_factor: &State<TwoFactorService>,
    current: AuthenticatedSession,
    payload: Json<TwoFactorEnrollRequest>,
) -> Result<Json<ChallengeIssuedResponse>, AppError> {
    let user = auth.find_user(&current.user_id).await?;
    Ok(Json(two_factor.start_enrollment(&user, payload.method).await?))
}

/// Confirm an email/SMS enrollment with the delivered code
#[openapi(tag = "Two-Factor Authentication")]
#[post("/enroll/confirm", data = "<payload>")]
pub async fn confirm_enrollment(
    auth: &State<AuthService>,
    two_factor: &State<TwoFactorService>,
    current: AuthenticatedSession,
    payload: Json<TwoFactorConfirmRequest>,
) -> Result<Status, AppError> {
    payload.validate()?;
    let user = auth.find_user(&current.user_id).await?;
    two_factor.confirm_enrollment(&user, payload.method, &payload.code).await?;
    Ok(Status::NoContent)
}

/// Disable two-factor authentication (requires password and a current code)
#[openapi(tag = "Two-Factor Authentication")]
#[post("/disable", data = "<payload>")]
pub async fn disable_two_factor(
    auth: &State<AuthService>,
    two_factor: &State<TwoFactorService>,
    current: AuthenticatedSession,
    payload: Json<TwoFactorDisableRequest>,
) -> Result<Status, AppError> {
    payload.validate()?;
    let user = auth.find_user(&current.user_id).await?;
    two_factor.disable(&user, &payload.password, &payload.code).await?;
    Ok(Status::NoContent)
}

pub fn routes() -> (Vec<rocket::Route>, okapi::openapi3::OpenApi) {
    rocket_okapi::openapi_get_routes_spec![
        get_two_factor_status,
        setup_totp,
        enable_totp,
        start_enrollment,
        confirm_enrollment,
        disable_two_factor
    ]
}
