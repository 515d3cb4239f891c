//! Reconstructed entities.

use common::AggregateId;
use event_store::Revision;
use serde::Serialize;

/// An aggregate's state as of a given revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity<S> {
    pub aggregate: AggregateId,

    #[serde(rename = "type")]
    pub entity_type: String,

    pub state: S,

    /// Revision of the last event folded into `state`.
    pub revision: Revision,

    /// Revision of the last event in the log, folded or not.
    #[serde(skip)]
    head: Revision,
}

impl<S> Entity<S> {
    pub(crate) fn new(
        aggregate: AggregateId,
        entity_type: String,
        state: S,
        revision: Revision,
        head: Revision,
    ) -> Self {
        Self {
            aggregate,
            entity_type,
            state,
            revision,
            head,
        }
    }

    /// Returns the revision appends must expect to keep this view current.
    ///
    /// Differs from `revision` when the log ends in events this entity's
    /// description does not handle.
    pub fn head_revision(&self) -> Revision {
        self.head
    }

    /// Maps the state while keeping identity and revisions.
    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Entity<T> {
        Entity {
            aggregate: self.aggregate,
            entity_type: self.entity_type,
            state: f(self.state),
            revision: self.revision,
            head: self.head,
        }
    }
}

/// Result of folding a log, before deciding whether an entity exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay<S> {
    pub aggregate: AggregateId,
    pub entity_type: String,
    pub state: Option<S>,
    pub revision: Revision,
    pub head: Revision,
    /// Events that changed the fold.
    pub applied: usize,
    /// Events with no matching initializer or reducer.
    pub skipped: usize,
}

impl<S> Replay<S> {
    pub fn is_available(&self) -> bool {
        self.state.is_some()
    }

    pub fn into_entity(self) -> Option<Entity<S>> {
        let Replay {
            aggregate,
            entity_type,
            state,
            revision,
            head,
            ..
        } = self;
        state.map(|state| Entity::new(aggregate, entity_type, state, revision, head))
    }
}
