pub mod config;
pub mod replay;
pub mod scenario;
pub mod watch;
