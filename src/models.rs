pub mod device;
pub mod health;
pub mod session;
pub mod session_history;
pub mod token;
pub mod two_factor;
pub mod user;
