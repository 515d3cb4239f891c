//! Decorator that masks transient backend faults.

use async_trait::async_trait;
use common::{RetryError, RetryOptions, retry};

use crate::{
    AggregateId, DomainEvent, RecordedEvent, Result, Revision,
    store::{AppendOptions, EventStore},
};

fn is_transient<T>(outcome: &Result<T>) -> bool {
    matches!(outcome, Err(e) if e.is_transient())
}

/// Wraps an event store and retries operations that fail transiently.
///
/// Conflicts and every other error are returned immediately: retrying an
/// append after a conflict would repeat the same stale assumption.
#[derive(Debug, Clone)]
pub struct RetryingEventStore<S> {
    inner: S,
    options: RetryOptions,
}

impl<S: EventStore> RetryingEventStore<S> {
    /// Wraps `inner` with the given retry policy.
    ///
    /// Fails if the policy's limit is above the allowed ceiling.
    pub fn new(inner: S, options: RetryOptions) -> std::result::Result<Self, RetryError> {
        options.validate()?;
        Ok(Self { inner, options })
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EventStore> EventStore for RetryingEventStore<S> {
    async fn load(&self, aggregate: &AggregateId) -> Result<Vec<RecordedEvent>> {
        let inner = &self.inner;
        retry(move || inner.load(aggregate), is_transient, self.options).await?
    }

    async fn append(
        &self,
        aggregate: &AggregateId,
        events: Vec<DomainEvent>,
        options: AppendOptions,
    ) -> Result<Revision> {
        let inner = &self.inner;
        retry(
            move || inner.append(aggregate, events.clone(), options.clone()),
            is_transient,
            self.options,
        )
        .await?
    }
}
