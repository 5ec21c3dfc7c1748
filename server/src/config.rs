//! Server configuration loaded from environment variables.
//!
//! Tuning knobs fall back to their defaults when unset or unparsable. `PORT`
//! is the exception: a malformed port is a startup error rather than a
//! silent bind to the default.

use crate::error::ErrorCode;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_STORE_QUEUE_CAPACITY: usize = 8192;
pub const DEFAULT_STORE_RETRIES: usize = 2;
pub const DEFAULT_STORE_RETRY_BASE_MS: u64 = 20;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT: {0:?}")]
    InvalidPort(String),
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPort(_) => "E_CONFIG_PORT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. Unset means rooms live in memory only.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Capacity of the store worker queue.
    pub store_queue_capacity: usize,
    /// Attempts per store write when the failure is retryable.
    pub store_retries: usize,
    pub store_retry_base_ms: u64,
    /// Capacity of each session's outbound channel.
    pub client_channel_capacity: usize,
    /// Allowed CORS origin. Unset allows any origin.
    pub cors_origin: Option<String>,
}

impl Config {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPort`] if `PORT` is set but is not a
    /// valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidPort(raw))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            database_url: env_string("DATABASE_URL"),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            store_queue_capacity: env_parse("STORE_QUEUE_CAPACITY", DEFAULT_STORE_QUEUE_CAPACITY).max(1),
            store_retries: env_parse("STORE_RETRIES", DEFAULT_STORE_RETRIES).max(1),
            store_retry_base_ms: env_parse("STORE_RETRY_BASE_MS", DEFAULT_STORE_RETRY_BASE_MS),
            client_channel_capacity: env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1),
            cors_origin: env_string("CORS_ORIGIN"),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            store_queue_capacity: DEFAULT_STORE_QUEUE_CAPACITY,
            store_retries: DEFAULT_STORE_RETRIES,
            store_retry_base_ms: DEFAULT_STORE_RETRY_BASE_MS,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            cors_origin: None,
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
