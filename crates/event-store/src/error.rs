use common::RetryError;
use thiserror::Error;

use crate::{AggregateId, Revision};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A writer without an explicit expectation lost a race for the next
    /// revision of this aggregate.
    #[error("Revision conflict for aggregate {aggregate}")]
    RevisionConflict { aggregate: AggregateId },

    /// The caller expected the log to be at `expected`, but it has moved on.
    #[error(
        "Expected revision conflict for aggregate {aggregate}: expected {expected}, found {actual}"
    )]
    ExpectedRevisionConflict {
        aggregate: AggregateId,
        expected: Revision,
        actual: Revision,
    },

    /// A temporary backend fault (throttling, timeout, clock skew).
    /// Safe to retry without reloading state.
    #[error("Transient storage fault: {0}")]
    Transient(String),

    /// The append request itself is malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A subscriber fell behind the broadcast buffer and missed events.
    #[error("Subscription lagged behind by {0} events")]
    SubscriptionLagged(u64),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The retry policy wrapping the store is misconfigured.
    #[error("Retry policy error: {0}")]
    Retry(#[from] RetryError),
}

impl EventStoreError {
    /// Returns true for faults that a retry can mask.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true for optimistic-concurrency conflicts of either shape.
    ///
    /// Conflicts must not be retried without reloading state first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::RevisionConflict { .. } | Self::ExpectedRevisionConflict { .. }
        )
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_and_conflicts() {
        let aggregate = AggregateId::new("account", "a1");

        assert!(EventStoreError::Transient("throttled".into()).is_transient());
        assert!(!EventStoreError::Transient("throttled".into()).is_conflict());

        let conflict = EventStoreError::ExpectedRevisionConflict {
            aggregate: aggregate.clone(),
            expected: Revision::initial(),
            actual: Revision::initial(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
        assert!(EventStoreError::RevisionConflict { aggregate }.is_conflict());
    }
}
