//! Event store contract for the event-sourced runtime.
//!
//! - [`EventStore`] is the append/load contract every backend implements,
//!   including the optimistic-concurrency rules for `append`
//! - [`InMemoryEventStore`] is the reference implementation
//! - [`RetryingEventStore`] masks transient faults with jittered backoff
//! - [`Subscription`] follows appended events live

pub mod error;
pub mod event;
pub mod memory;
pub mod retrying;
pub mod store;
pub mod subscription;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{DomainEvent, EventId, EventMetadata, RecordedEvent, RecordedEventBuilder, Revision};
pub use memory::InMemoryEventStore;
pub use retrying::RetryingEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
pub use subscription::Subscription;
