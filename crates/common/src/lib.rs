//! Shared types for the event-sourced runtime.
//!
//! - [`AggregateId`] identifies one event log
//! - [`retry`] masks transient faults behind a jittered exponential backoff

pub mod retry;
pub mod types;

pub use retry::{RetryDecision, RetryError, RetryOptions, retry};
pub use types::{AggregateId, ParseAggregateIdError};
