//! Bounded worker pool placed in front of command dispatch at transport
//! boundaries.
//!
//! [`WorkerPool`] limits how much work runs at once, fails fast once too
//! many callers are waiting, bounds each unit of work with a timeout that
//! cancels it cooperatively, and drains in-flight work on shutdown.

pub mod error;
pub mod pool;

pub use error::PoolError;
pub use pool::{DrainReport, PoolConfig, WorkerPool};
pub use tokio_util::sync::CancellationToken;
