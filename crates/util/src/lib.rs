//! Process configuration for the channel tracker, read from the environment.
pub mod config;

use std::{env, net::SocketAddr};

pub use config::{AppConfig, ConfigError, Environment, TwitchConfig, WebhookConfig};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Populates the environment from a `.env` file if one is present.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// `APP_BIND_ADDR`, or [`DEFAULT_BIND_ADDR`] when unset.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    match env::var("APP_BIND_ADDR") {
        Ok(value) => value.trim().parse(),
        Err(_) => DEFAULT_BIND_ADDR.parse(),
    }
}

// env vars are process-global; tests that touch them take this lock
#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));
