use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, DomainEvent, EventStoreError, RecordedEvent, Result, Revision};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Expected latest revision of the aggregate for optimistic concurrency
    /// control. If None, no check is performed (last writer wins); only use
    /// that when writers are already serialized.
    pub expected_revision: Option<Revision>,

    /// Request trace this append belongs to.
    pub correlation_id: Option<String>,

    /// Event or command that caused this append.
    pub causation_id: Option<String>,
}

impl AppendOptions {
    /// Creates options with no revision check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the aggregate to be at a specific revision.
    pub fn expect_revision(revision: Revision) -> Self {
        Self {
            expected_revision: Some(revision),
            ..Self::default()
        }
    }

    /// Creates options expecting the aggregate to have no events yet.
    pub fn expect_new() -> Self {
        Self::expect_revision(Revision::initial())
    }

    /// Sets the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets the causation id.
    pub fn causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }
}

/// A stream of recorded events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RecordedEvent>> + Send>>;

/// Contract every storage backend implements.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Retrieves the log of an aggregate, oldest first.
    ///
    /// Returns an empty vector if the aggregate has never been written.
    async fn load(&self, aggregate: &AggregateId) -> Result<Vec<RecordedEvent>>;

    /// Appends events to an aggregate's log.
    ///
    /// Events are appended atomically - either all succeed or none do. Each
    /// event receives a revision greater than every revision already in the
    /// log. If `options.expected_revision` is set and the latest revision
    /// differs, nothing is written and `ExpectedRevisionConflict` is
    /// returned.
    ///
    /// Returns the revision of the last event written.
    async fn append(
        &self,
        aggregate: &AggregateId,
        events: Vec<DomainEvent>,
        options: AppendOptions,
    ) -> Result<Revision>;
}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for Arc<T> {
    async fn load(&self, aggregate: &AggregateId) -> Result<Vec<RecordedEvent>> {
        (**self).load(aggregate).await
    }

    async fn append(
        &self,
        aggregate: &AggregateId,
        events: Vec<DomainEvent>,
        options: AppendOptions,
    ) -> Result<Revision> {
        (**self).append(aggregate, events, options).await
    }
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_event(
        &self,
        aggregate: &AggregateId,
        event: DomainEvent,
        options: AppendOptions,
    ) -> Result<Revision> {
        self.append(aggregate, vec![event], options).await
    }

    /// Returns the latest revision of an aggregate, or `Initial` for an
    /// empty log.
    async fn latest_revision(&self, aggregate: &AggregateId) -> Result<Revision> {
        Ok(self
            .load(aggregate)
            .await?
            .last()
            .map(|event| event.revision)
            .unwrap_or_else(Revision::initial))
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate: &AggregateId) -> Result<bool> {
        Ok(!self.latest_revision(aggregate).await?.is_initial())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates events before appending.
pub fn validate_events_for_append(events: &[DomainEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    }

    if let Some(unnamed) = events.iter().position(|e| e.event_type.is_empty()) {
        return Err(EventStoreError::InvalidAppend(format!(
            "Event at index {unnamed} has an empty type"
        )));
    }

    Ok(())
}
