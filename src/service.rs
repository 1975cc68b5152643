pub mod auth;
pub mod challenge;
pub mod email;
pub mod fingerprint;
pub mod security;
pub mod session;
pub mod session_history;
pub mod session_store;
pub mod sms;
pub mod token;
pub mod totp;
pub mod two_factor;
