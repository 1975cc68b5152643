use crate::error::app_error::SESSION_INVALID_MESSAGE;
use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, catch};

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub message: String,
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    Json(Error {
        message: SESSION_INVALID_MESSAGE.to_string(),
    })
}

#[catch(404)]
pub fn not_found(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Not found".to_string(),
    })
}

#[catch(422)]
pub fn unprocessable(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Malformed request body".to_string(),
    })
}

#[catch(429)]
pub fn too_many_requests(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Too many attempts".to_string(),
    })
}
