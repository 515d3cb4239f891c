//! Worker pool error types.

use std::time::Duration;

use thiserror::Error;

/// Capacity and timeout conditions, distinct from anything the work itself
/// returns so callers can apply their own backoff.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    /// Too many callers are already waiting for a slot.
    #[error("Worker pool saturated: {waiting} callers already waiting")]
    Saturated { waiting: usize },

    /// The work did not finish within its allotted time.
    #[error("Work timed out after {0:?}")]
    Timeout(Duration),

    /// The work panicked.
    #[error("Work panicked")]
    Panicked,
}

impl PoolError {
    /// Returns true if the same work may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Saturated { .. } | PoolError::Timeout(_))
    }
}
