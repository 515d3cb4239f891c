//! Entity error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

use crate::schema::ValidationError;

/// Errors raised while reconstructing an entity from its log.
#[derive(Debug, Error)]
pub enum EntityError {
    /// No state could be produced: the log is empty or no event initialized it.
    #[error("Entity not available: {0}")]
    NotAvailable(AggregateId),

    /// The identifier names a different entity type than the description.
    #[error("Entity type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A stored event payload did not match its registered shape.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

/// The per-aggregate serializer could not deliver a job's result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializerError {
    /// The job panicked or its worker was torn down before completing it.
    #[error("Serialized job aborted before completing")]
    Aborted,
}

/// Errors returned by command dispatch.
///
/// `E` is the entity's own rejection type; business-rule failures travel
/// through [`CommandError::Rejected`] untouched.
#[derive(Debug, Error)]
pub enum CommandError<E> {
    /// No handler is registered under this command name.
    #[error("No handler registered for command '{command}' on entity '{entity_type}'")]
    HandlerNotFound { entity_type: String, command: String },

    /// The payload failed schema validation or typed decoding.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The command requires an existing entity.
    #[error("Entity not available: {0}")]
    NotAvailable(AggregateId),

    /// The target identifier names a different entity type.
    #[error("Entity type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// A stored or produced payload could not be (de)serialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The serialized execution was aborted.
    #[error(transparent)]
    Serializer(#[from] SerializerError),

    /// The handler rejected the command.
    #[error("Command rejected: {0}")]
    Rejected(E),
}

impl<E> CommandError<E> {
    /// Returns true if the caller sent something the entity cannot accept.
    ///
    /// Transports map these to client errors; everything else is a server
    /// or infrastructure failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CommandError::Validation(_)
                | CommandError::NotAvailable(_)
                | CommandError::TypeMismatch { .. }
                | CommandError::Rejected(_)
        )
    }

    /// Returns true if the command lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommandError::EventStore(e) if e.is_conflict())
    }

    /// Short label for metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            CommandError::HandlerNotFound { .. } => "handler_not_found",
            CommandError::Validation(_) => "validation",
            CommandError::NotAvailable(_) => "not_available",
            CommandError::TypeMismatch { .. } => "type_mismatch",
            CommandError::EventStore(e) if e.is_conflict() => "conflict",
            CommandError::EventStore(_) => "event_store",
            CommandError::Deserialization(_) => "deserialization",
            CommandError::Serializer(_) => "serializer",
            CommandError::Rejected(_) => "rejected",
        }
    }
}

impl<E> From<EntityError> for CommandError<E> {
    fn from(error: EntityError) -> Self {
        match error {
            EntityError::NotAvailable(id) => CommandError::NotAvailable(id),
            EntityError::TypeMismatch { expected, actual } => {
                CommandError::TypeMismatch { expected, actual }
            }
            EntityError::EventStore(e) => CommandError::EventStore(e),
            EntityError::Deserialization(e) => CommandError::Deserialization(e),
        }
    }
}
