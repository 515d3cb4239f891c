//! Bounded retry with full-jitter exponential backoff.
//!
//! [`retry`] runs an async operation until the caller's predicate says stop
//! or the attempt limit is reached. The predicate sees every outcome, success
//! and failure alike, so callers can retry on "soft" successes too.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Default number of attempts.
pub const DEFAULT_LIMIT: u32 = 10;

/// Default base delay.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Hard ceiling on attempts; beyond this the backoff curve reaches hours.
pub const MAX_LIMIT: u32 = 31;

/// Errors raised by the retry combinator itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The configured attempt limit exceeds [`MAX_LIMIT`].
    #[error("retry limit {limit} exceeds the maximum of {max}")]
    LimitTooHigh { limit: u32, max: u32 },
}

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return this attempt's outcome.
    Stop,
    /// Retry after a jittered exponential delay.
    Retry,
    /// Retry after exactly this long.
    RetryAfter(Duration),
}

impl From<bool> for RetryDecision {
    fn from(retry: bool) -> Self {
        if retry { Self::Retry } else { Self::Stop }
    }
}

/// Attempt limit and base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts, including the first.
    pub limit: u32,
    /// Base delay fed into the backoff curve.
    pub delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            delay: DEFAULT_DELAY,
        }
    }
}

impl RetryOptions {
    /// Creates options with the default delay and the given attempt limit.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Checks the limit against [`MAX_LIMIT`].
    pub fn validate(&self) -> Result<(), RetryError> {
        if self.limit > MAX_LIMIT {
            return Err(RetryError::LimitTooHigh {
                limit: self.limit,
                max: MAX_LIMIT,
            });
        }
        Ok(())
    }
}

/// Computes the full-jitter wait after attempt `attempt` (1-indexed).
///
/// `base = delay * 2^(attempt - 1) / 2`, and the wait is
/// `ceil(base + random(0, base))` milliseconds.
pub fn backoff_delay(delay: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_LIMIT) as i32;
    let base = delay.as_millis() as f64 * 2f64.powi(exponent) / 2.0;
    let jitter = if base > 0.0 {
        rand::rng().random_range(0.0..=base)
    } else {
        0.0
    };
    Duration::from_millis((base + jitter).ceil() as u64)
}

/// Runs `operation` until `should_retry` returns [`RetryDecision::Stop`] or
/// `options.limit` attempts have been made.
///
/// The outcome of the last attempt is returned as-is. An invalid limit is
/// reported before `operation` is ever called.
pub async fn retry<T, E, Op, Fut, P, D>(
    mut operation: Op,
    mut should_retry: P,
    options: RetryOptions,
) -> Result<Result<T, E>, RetryError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&Result<T, E>) -> D,
    D: Into<RetryDecision>,
{
    options.validate()?;
    let limit = options.limit.max(1);

    let mut attempt = 1;
    loop {
        let outcome = operation().await;
        if attempt >= limit {
            return Ok(outcome);
        }

        let wait = match should_retry(&outcome).into() {
            RetryDecision::Stop => return Ok(outcome),
            RetryDecision::Retry => backoff_delay(options.delay, attempt),
            RetryDecision::RetryAfter(wait) => wait,
        };

        tracing::warn!(attempt, limit, wait_ms = wait.as_millis() as u64, "retrying");
        metrics::counter!("retry_attempts_total").increment(1);
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
