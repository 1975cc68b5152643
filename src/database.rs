pub mod postgres_repository;
pub mod session_history;
pub mod two_factor;
pub mod user;
