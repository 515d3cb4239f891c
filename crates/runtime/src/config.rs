//! Runtime configuration loaded from environment variables.

use std::time::Duration;

use common::{RetryError, RetryOptions};
use thiserror::Error;
use worker_pool::PoolConfig;

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `"json"` for JSON logs, anything else for text
/// - `RETRY_LIMIT`, `RETRY_DELAY_MS`: transient store fault retries
/// - `POOL_MAX_CONCURRENCY`, `POOL_MAX_PENDING`, `POOL_TIMEOUT_MS`,
///   `POOL_SHUTDOWN_TIMEOUT_MS`: worker pool limits
///
/// Unparseable values fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub log_json: bool,
    pub retry: RetryOptions,
    pub pool: PoolConfig,
}

/// Configuration values that parse but cannot be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid retry policy: {0}")]
    Retry(#[from] RetryError),

    #[error("Pool concurrency must be at least 1")]
    ZeroConcurrency,
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn millis(name: &str) -> Option<Duration> {
    parsed::<u64>(name).map(Duration::from_millis)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: std::env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(defaults.log_json),
            retry: RetryOptions {
                limit: parsed("RETRY_LIMIT").unwrap_or(defaults.retry.limit),
                delay: millis("RETRY_DELAY_MS").unwrap_or(defaults.retry.delay),
            },
            pool: PoolConfig {
                max_concurrency: parsed("POOL_MAX_CONCURRENCY")
                    .unwrap_or(defaults.pool.max_concurrency),
                max_pending: parsed("POOL_MAX_PENDING").unwrap_or(defaults.pool.max_pending),
                default_timeout: millis("POOL_TIMEOUT_MS").unwrap_or(defaults.pool.default_timeout),
                shutdown_timeout: millis("POOL_SHUTDOWN_TIMEOUT_MS")
                    .unwrap_or(defaults.pool.shutdown_timeout),
            },
        }
    }

    /// Rejects values that would make the runtime unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.pool.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            retry: RetryOptions::default(),
            pool: PoolConfig::default(),
        }
    }
}
