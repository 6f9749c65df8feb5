pub mod auth;
pub mod watch;
