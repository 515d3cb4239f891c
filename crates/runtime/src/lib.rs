//! Runtime facade for the event-sourced entity layer.
//!
//! [`Runtime`] wires the pieces together for one entity type:
//!
//! - the event store is wrapped in a [`RetryingEventStore`] so transient
//!   backend faults are retried with the configured policy
//! - work for one aggregate goes through the [`AggregateSerializer`], so
//!   handlers never race each other on the same log
//! - a command at the head of its aggregate's queue runs on the
//!   [`WorkerPool`], which bounds concurrency across aggregates
//!
//! Configuration and tracing setup live in [`config`] and [`telemetry`].

pub mod config;
pub mod error;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use entity::{AggregateSerializer, CommandDispatcher, Entity, EntityDescription};
use event_store::{EventStore, RetryingEventStore};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, warn};
use worker_pool::{DrainReport, PoolError, WorkerPool};

pub use config::{Config, ConfigError};
pub use error::RuntimeError;

/// Per-call overrides for [`Runtime::execute_with`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Deadline for queueing plus execution; the pool default when `None`.
    pub timeout: Option<Duration>,
    /// Correlation id stamped on appended events; generated when `None`.
    pub correlation_id: Option<String>,
}

impl ExecuteOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Executes commands for one entity type.
pub struct Runtime<S, E> {
    config: Config,
    dispatcher: CommandDispatcher<S, E>,
    serializer: AggregateSerializer,
    pool: WorkerPool,
}

impl<S, E> Clone for Runtime<S, E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
            serializer: self.serializer.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<S, E> Runtime<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Builds a runtime over `store` after validating `config`.
    pub fn new<St>(
        config: Config,
        store: St,
        description: EntityDescription<S, E>,
    ) -> Result<Self, RuntimeError<E>>
    where
        St: EventStore + 'static,
    {
        config.validate()?;
        let store = RetryingEventStore::new(store, config.retry).map_err(ConfigError::from)?;
        let store: Arc<dyn EventStore> = Arc::new(store);
        Ok(Self {
            dispatcher: CommandDispatcher::new(store, Arc::new(description)),
            serializer: AggregateSerializer::new(),
            pool: WorkerPool::new(config.pool),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn description(&self) -> &EntityDescription<S, E> {
        self.dispatcher.description()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Executes `command` against `aggregate` with default options.
    pub async fn execute(
        &self,
        command: &str,
        aggregate: AggregateId,
        payload: Value,
    ) -> Result<Entity<S>, RuntimeError<E>> {
        self.execute_with(command, aggregate, payload, ExecuteOptions::default())
            .await
    }

    /// Executes `command` once it reaches the head of its aggregate's queue.
    ///
    /// A pool slot is only taken at the head of the queue, so a busy
    /// aggregate never holds capacity other aggregates could use. The
    /// deadline covers queueing and running; work whose deadline passed while
    /// it was still queued is skipped rather than run late.
    #[instrument(skip(self, payload, options), fields(aggregate = %aggregate))]
    pub async fn execute_with(
        &self,
        command: &str,
        aggregate: AggregateId,
        payload: Value,
        options: ExecuteOptions,
    ) -> Result<Entity<S>, RuntimeError<E>> {
        let limit = options.timeout.unwrap_or(self.pool.config().default_timeout);
        let deadline = Instant::now() + limit;

        let pool = self.pool.clone();
        let dispatcher = self.dispatcher.clone();
        let command = command.to_string();
        let correlation_id = options.correlation_id;
        let target = aggregate.clone();

        let queued = self.serializer.submit(&aggregate, async move {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("Deadline passed while queued behind the aggregate");
                return Err(RuntimeError::Pool(PoolError::Timeout(limit)));
            }

            let (finished, handler_stopped) = oneshot::channel::<()>();
            let outcome = pool
                .execute(
                    move |token| async move {
                        let _finished = finished;
                        if token.is_cancelled() {
                            return None;
                        }
                        Some(
                            dispatcher
                                .dispatch_correlated(&command, target, payload, correlation_id)
                                .await,
                        )
                    },
                    Some(remaining),
                )
                .await;
            // The next command for this aggregate waits until the handler has
            // actually stopped, even if the caller was already told it timed out.
            let _ = handler_stopped.await;

            match outcome {
                Ok(Some(Ok(entity))) => Ok(entity),
                Ok(Some(Err(e))) => Err(RuntimeError::Command(e)),
                Ok(None) => Err(RuntimeError::Pool(PoolError::ShuttingDown)),
                Err(e) => Err(RuntimeError::Pool(e)),
            }
        });

        match timeout_at(deadline, queued).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(?limit, "Command timed out");
                Err(PoolError::Timeout(limit).into())
            }
        }
    }

    /// Loads the current entity without running a command.
    pub async fn load(&self, aggregate: &AggregateId) -> Result<Entity<S>, RuntimeError<E>> {
        Ok(self.dispatcher.loader().load(aggregate).await?)
    }

    /// Stops accepting work and drains what is in flight.
    pub async fn shutdown(&self) -> DrainReport {
        self.pool.shutdown().await
    }
}
