//! Live event subscriptions.
//!
//! A [`Subscription`] drains a broadcast channel independently of other
//! subscribers. Late joiners are first fed the stored backlog after a given
//! revision, then switch to live events without gaps or duplicates.

use std::collections::VecDeque;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::store::EventStream;
use crate::{AggregateId, EventStoreError, RecordedEvent, Result, Revision};

/// A subscriber's cursor over appended events.
pub struct Subscription {
    backlog: VecDeque<RecordedEvent>,
    receiver: broadcast::Receiver<RecordedEvent>,
    aggregate: Option<AggregateId>,
    last_seen: Revision,
}

impl Subscription {
    /// Subscribes to every event appended from now on.
    pub(crate) fn live(receiver: broadcast::Receiver<RecordedEvent>) -> Self {
        Self {
            backlog: VecDeque::new(),
            receiver,
            aggregate: None,
            last_seen: Revision::initial(),
        }
    }

    /// Subscribes to one aggregate, replaying `backlog` before live events.
    ///
    /// `receiver` must have been created before `backlog` was read so that
    /// nothing appended in between is lost; overlap is filtered by revision.
    pub(crate) fn replaying(
        aggregate: AggregateId,
        after: Revision,
        backlog: Vec<RecordedEvent>,
        receiver: broadcast::Receiver<RecordedEvent>,
    ) -> Self {
        Self {
            backlog: backlog.into_iter().filter(|e| e.revision > after).collect(),
            receiver,
            aggregate: Some(aggregate),
            last_seen: after,
        }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the store has been dropped, and
    /// `SubscriptionLagged` if this subscriber fell too far behind.
    pub async fn next(&mut self) -> Option<Result<RecordedEvent>> {
        if let Some(event) = self.backlog.pop_front() {
            self.last_seen = event.revision;
            return Some(Ok(event));
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    let Some(aggregate) = &self.aggregate else {
                        return Some(Ok(event));
                    };
                    if &event.aggregate != aggregate || event.revision <= self.last_seen {
                        continue;
                    }
                    self.last_seen = event.revision;
                    return Some(Ok(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged");
                    return Some(Err(EventStoreError::SubscriptionLagged(skipped)));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Adapts the subscription into a stream.
    pub fn into_stream(self) -> EventStream {
        Box::pin(futures_util::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|item| (item, sub))
        }))
    }
}
