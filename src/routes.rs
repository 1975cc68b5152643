pub mod auth;
pub mod error;
pub mod health;
pub mod sessions;
pub mod two_factor;
