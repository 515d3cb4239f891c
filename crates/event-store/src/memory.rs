use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};

use crate::{
    AggregateId, DomainEvent, EventId, EventMetadata, EventStoreError, RecordedEvent, Result,
    Revision, Subscription,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

/// Default number of events buffered for slow subscribers.
const DEFAULT_FEED_CAPACITY: usize = 1024;

/// In-memory event store implementation for testing and single-process use.
///
/// Logs are kept per aggregate behind one lock, which makes every append
/// trivially atomic. Appended events are also broadcast to subscribers.
#[derive(Clone)]
pub struct InMemoryEventStore {
    logs: Arc<RwLock<HashMap<AggregateId, Vec<RecordedEvent>>>>,
    feed: broadcast::Sender<RecordedEvent>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose subscribers may fall `capacity` events behind
    /// before they start missing events.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            logs: Arc::new(RwLock::new(HashMap::new())),
            feed,
        }
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.logs.read().await.values().map(Vec::len).sum()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.logs.write().await.clear();
    }

    /// Subscribes to every event appended from now on.
    pub fn subscribe_all(&self) -> Subscription {
        Subscription::live(self.feed.subscribe())
    }

    /// Subscribes to one aggregate, starting with the stored events after
    /// `after` and continuing with live appends.
    pub async fn subscribe_from(&self, aggregate: &AggregateId, after: Revision) -> Subscription {
        let receiver = self.feed.subscribe();
        let backlog = self
            .logs
            .read()
            .await
            .get(aggregate)
            .cloned()
            .unwrap_or_default();
        Subscription::replaying(aggregate.clone(), after, backlog, receiver)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self), fields(aggregate = %aggregate))]
    async fn load(&self, aggregate: &AggregateId) -> Result<Vec<RecordedEvent>> {
        let logs = self.logs.read().await;
        Ok(logs.get(aggregate).cloned().unwrap_or_default())
    }

    #[tracing::instrument(skip(self, events, options), fields(aggregate = %aggregate, count = events.len()))]
    async fn append(
        &self,
        aggregate: &AggregateId,
        events: Vec<DomainEvent>,
        options: AppendOptions,
    ) -> Result<Revision> {
        validate_events_for_append(&events)?;

        let mut logs = self.logs.write().await;
        let log = logs.entry(aggregate.clone()).or_default();

        let current = log
            .last()
            .map(|e| e.revision)
            .unwrap_or_else(Revision::initial);

        // Check expected revision if specified
        if let Some(expected) = options.expected_revision
            && current != expected
        {
            metrics::counter!("event_store_conflicts_total").increment(1);
            tracing::warn!(%expected, actual = %current, "expected revision conflict");
            return Err(EventStoreError::ExpectedRevisionConflict {
                aggregate: aggregate.clone(),
                expected,
                actual: current,
            });
        }

        let metadata = EventMetadata {
            correlation_id: options.correlation_id,
            causation_id: options.causation_id,
        };
        let timestamp = Utc::now();

        // Assign revisions before touching the log so a failure writes nothing
        let mut previous = current;
        let mut recorded = Vec::with_capacity(events.len());
        for event in events {
            let revision = Revision::next_after(previous).ok_or_else(|| {
                EventStoreError::Transient("revision space exhausted".to_string())
            })?;
            recorded.push(RecordedEvent {
                id: EventId::new(),
                aggregate: aggregate.clone(),
                event_type: event.event_type,
                data: event.data,
                revision,
                timestamp,
                metadata: metadata.clone(),
            });
            previous = revision;
        }

        log.extend(recorded.iter().cloned());
        drop(logs);

        for event in recorded {
            // No subscribers is not an error.
            let _ = self.feed.send(event);
        }

        metrics::counter!("event_store_appends_total").increment(1);
        tracing::debug!(revision = %previous, "events appended");

        Ok(previous)
    }
}
