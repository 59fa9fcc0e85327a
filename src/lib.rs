pub mod abuse;
pub mod config;
pub mod config_validator;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod health;
pub mod history;
pub mod middleware;
pub mod profiler;
pub mod rate_limiter;
pub mod response;
pub mod scheduler;
pub mod server;
pub mod validation;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::Config;
pub use error::{GateError, Result};
pub use handlers::AppState;
pub use server::{create_app, Server};

/// Seconds since the Unix epoch; times before it read as zero.
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
