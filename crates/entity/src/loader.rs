//! Replay engine: rebuilds entities by folding their event logs.

use std::sync::Arc;

use common::AggregateId;
use event_store::{EventStore, RecordedEvent, Revision};
use tracing::{debug, instrument};

use crate::description::EntityDescription;
use crate::entity::{Entity, Replay};
use crate::error::EntityError;

/// Folds `events` with the description's initializer and reducer tables.
///
/// Pure: performs no I/O and reads no clock. Events whose type has no
/// matching initializer (before state exists) or reducer (after) are
/// skipped; `revision` tracks the last event that changed the fold.
pub fn replay<S, E>(
    description: &EntityDescription<S, E>,
    aggregate: &AggregateId,
    events: &[RecordedEvent],
) -> Result<Replay<S>, EntityError> {
    let mut state = description.seed().map(|seed| seed(aggregate));
    let mut revision = Revision::initial();
    let mut applied = 0;
    let mut skipped = 0;

    for event in events {
        let next = match state.take() {
            None => match description.initializer(&event.event_type) {
                Some(init) => Some(init(event)?),
                None => None,
            },
            Some(current) => match description.reducer(&event.event_type) {
                Some(reduce) => Some(reduce(current, event)?),
                None => {
                    state = Some(current);
                    None
                }
            },
        };

        match next {
            Some(folded) => {
                state = Some(folded);
                revision = event.revision;
                applied += 1;
            }
            None => {
                debug!(
                    aggregate = %aggregate,
                    event_type = %event.event_type,
                    revision = %event.revision,
                    "Skipping event with no handler"
                );
                skipped += 1;
            }
        }
    }

    Ok(Replay {
        aggregate: aggregate.clone(),
        entity_type: description.entity_type().to_string(),
        state,
        revision,
        head: events.last().map_or(Revision::initial(), |e| e.revision),
        applied,
        skipped,
    })
}

/// Loads entities of one type from an event store.
pub struct EntityLoader<S, E> {
    store: Arc<dyn EventStore>,
    description: Arc<EntityDescription<S, E>>,
}

impl<S, E> Clone for EntityLoader<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            description: Arc::clone(&self.description),
        }
    }
}

impl<S, E> EntityLoader<S, E> {
    pub fn new(store: Arc<dyn EventStore>, description: Arc<EntityDescription<S, E>>) -> Self {
        Self { store, description }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn description(&self) -> &Arc<EntityDescription<S, E>> {
        &self.description
    }

    /// Loads and folds the log, returning the replay even if no state exists.
    #[instrument(skip(self), fields(aggregate = %aggregate))]
    pub async fn try_load(&self, aggregate: &AggregateId) -> Result<Replay<S>, EntityError> {
        if aggregate.aggregate_type() != self.description.entity_type() {
            return Err(EntityError::TypeMismatch {
                expected: self.description.entity_type().to_string(),
                actual: aggregate.aggregate_type().to_string(),
            });
        }

        let events = self.store.load(aggregate).await?;
        let replay = replay(&self.description, aggregate, &events)?;
        debug!(
            events = events.len(),
            applied = replay.applied,
            skipped = replay.skipped,
            "Replayed entity"
        );
        Ok(replay)
    }

    /// Loads an entity, failing with `NotAvailable` if it has no state.
    pub async fn load(&self, aggregate: &AggregateId) -> Result<Entity<S>, EntityError> {
        self.try_load(aggregate)
            .await?
            .into_entity()
            .ok_or_else(|| EntityError::NotAvailable(aggregate.clone()))
    }
}
