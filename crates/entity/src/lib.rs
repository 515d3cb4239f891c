//! Entity layer of the event-sourced runtime.
//!
//! - [`EntityDescription`] declares an entity type: its initializer and
//!   reducer tables, event schemas, and command handlers
//! - [`EntityLoader`] replays an aggregate's log into an [`Entity`]
//! - [`CommandDispatcher`] validates a payload, runs its handler and reloads
//!   the entity if the handler appended
//! - [`AggregateSerializer`] runs same-aggregate work one at a time
//!
//! The [`account`] module is a complete example entity.

pub mod account;
pub mod description;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod loader;
pub mod schema;
pub mod serializer;

pub use description::{EntityDescription, EntityDescriptionBuilder};
pub use dispatcher::{CommandDispatcher, CommandEnv, Target};
pub use entity::{Entity, Replay};
pub use error::{CommandError, EntityError, SerializerError};
pub use loader::{EntityLoader, replay};
pub use schema::{FieldContract, FieldType, FieldViolation, PayloadSchema, ValidationError};
pub use serializer::AggregateSerializer;
