//! Command dispatch: validate, load, run the handler, reload if it wrote.

use std::sync::Arc;
use std::time::Instant;

use common::AggregateId;
use event_store::{AppendOptions, DomainEvent, EventStore, EventStoreError, Revision};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use ulid::Ulid;

use crate::description::EntityDescription;
use crate::entity::Entity;
use crate::error::CommandError;
use crate::loader::EntityLoader;

/// What a command is aimed at.
#[derive(Debug, Clone)]
pub enum Target<S> {
    /// Load the entity before running the handler.
    Id(AggregateId),
    /// Use an entity the caller already loaded.
    Loaded(Entity<S>),
}

impl<S> Target<S> {
    pub fn aggregate(&self) -> &AggregateId {
        match self {
            Target::Id(id) => id,
            Target::Loaded(entity) => &entity.aggregate,
        }
    }
}

impl<S> From<AggregateId> for Target<S> {
    fn from(id: AggregateId) -> Self {
        Target::Id(id)
    }
}

impl<S> From<Entity<S>> for Target<S> {
    fn from(entity: Entity<S>) -> Self {
        Target::Loaded(entity)
    }
}

#[derive(Debug)]
struct AppendCursor {
    expected: Revision,
    appends: usize,
    last: Option<Revision>,
}

/// Handle a command handler uses to append events for its aggregate.
///
/// Each append expects the revision left by the previous one, starting from
/// the head revision the entity was loaded at, so a concurrent writer makes
/// the command fail with a conflict instead of silently interleaving.
#[derive(Clone)]
pub struct CommandEnv {
    store: Arc<dyn EventStore>,
    aggregate: AggregateId,
    command: String,
    command_id: String,
    correlation_id: String,
    cursor: Arc<Mutex<AppendCursor>>,
}

impl std::fmt::Debug for CommandEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEnv")
            .field("aggregate", &self.aggregate)
            .field("command", &self.command)
            .field("command_id", &self.command_id)
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

impl CommandEnv {
    pub(crate) fn new(
        store: Arc<dyn EventStore>,
        aggregate: AggregateId,
        command: &str,
        expected: Revision,
        correlation_id: Option<String>,
    ) -> Self {
        let command_id = format!("{command}:{}", Ulid::new());
        Self {
            store,
            aggregate,
            command: command.to_string(),
            correlation_id: correlation_id.unwrap_or_else(|| command_id.clone()),
            command_id,
            cursor: Arc::new(Mutex::new(AppendCursor {
                expected,
                appends: 0,
                last: None,
            })),
        }
    }

    pub fn aggregate(&self) -> &AggregateId {
        &self.aggregate
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Unique id of this command execution, `"<command>:<ulid>"`.
    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Appends events, expecting the aggregate to be where this execution
    /// last saw it.
    pub async fn append(&self, events: Vec<DomainEvent>) -> Result<Revision, EventStoreError> {
        let mut cursor = self.cursor.lock().await;
        let options = AppendOptions::expect_revision(cursor.expected);
        self.append_locked(&mut cursor, events, options).await
    }

    /// Serializes `payload` and appends it as a single event.
    pub async fn append_event<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
    ) -> Result<Revision, EventStoreError> {
        let event = DomainEvent::from_payload(event_type, payload)?;
        self.append(vec![event]).await
    }

    /// Appends with caller-chosen concurrency options.
    ///
    /// Correlation and causation ids are filled in when `options` leaves
    /// them unset.
    pub async fn append_with(
        &self,
        events: Vec<DomainEvent>,
        options: AppendOptions,
    ) -> Result<Revision, EventStoreError> {
        let mut cursor = self.cursor.lock().await;
        self.append_locked(&mut cursor, events, options).await
    }

    async fn append_locked(
        &self,
        cursor: &mut AppendCursor,
        events: Vec<DomainEvent>,
        mut options: AppendOptions,
    ) -> Result<Revision, EventStoreError> {
        if options.correlation_id.is_none() {
            options = options.correlation_id(self.correlation_id.clone());
        }
        if options.causation_id.is_none() {
            let causation = match cursor.last {
                Some(previous) => previous.to_string(),
                None => self.command_id.clone(),
            };
            options = options.causation_id(causation);
        }

        let revision = self.store.append(&self.aggregate, events, options).await?;
        cursor.expected = revision;
        cursor.last = Some(revision);
        cursor.appends += 1;
        Ok(revision)
    }

    /// Number of successful appends so far.
    pub async fn appends(&self) -> usize {
        self.cursor.lock().await.appends
    }
}

/// Routes named commands to the handlers of one entity description.
pub struct CommandDispatcher<S, E> {
    loader: EntityLoader<S, E>,
}

impl<S, E> Clone for CommandDispatcher<S, E> {
    fn clone(&self) -> Self {
        Self {
            loader: self.loader.clone(),
        }
    }
}

impl<S, E> CommandDispatcher<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new(store: Arc<dyn EventStore>, description: Arc<EntityDescription<S, E>>) -> Self {
        Self {
            loader: EntityLoader::new(store, description),
        }
    }

    pub fn loader(&self) -> &EntityLoader<S, E> {
        &self.loader
    }

    pub fn description(&self) -> &Arc<EntityDescription<S, E>> {
        self.loader.description()
    }

    /// Dispatches `command` with a fresh correlation id.
    pub async fn dispatch(
        &self,
        command: &str,
        target: impl Into<Target<S>>,
        payload: Value,
    ) -> Result<Entity<S>, CommandError<E>> {
        self.dispatch_correlated(command, target, payload, None).await
    }

    /// Dispatches `command`, tagging appended events with `correlation_id`.
    ///
    /// The payload is validated and decoded before anything is loaded; an
    /// invalid payload never reaches the handler. The entity is reloaded
    /// only if the handler appended. Every call is counted, failures
    /// included, under an `outcome` label.
    #[instrument(
        skip(self, target, payload, correlation_id),
        fields(entity = %self.description().entity_type(), aggregate = tracing::field::Empty)
    )]
    pub async fn dispatch_correlated(
        &self,
        command: &str,
        target: impl Into<Target<S>>,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Result<Entity<S>, CommandError<E>> {
        let started = Instant::now();
        let result = self
            .run(command, target.into(), payload, correlation_id)
            .await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.outcome(),
        };
        metrics::counter!(
            "commands_dispatched_total",
            "command" => command.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("command_duration_seconds", "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run(
        &self,
        command: &str,
        target: Target<S>,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Result<Entity<S>, CommandError<E>> {
        tracing::Span::current().record("aggregate", tracing::field::display(target.aggregate()));

        let description = self.description();
        let Some(registration) = description.command(command) else {
            return Err(CommandError::HandlerNotFound {
                entity_type: description.entity_type().to_string(),
                command: command.to_string(),
            });
        };

        registration.schema.validate(&payload)?;
        let prepared = (registration.handler)(payload)?;

        let (aggregate, entity, head) = match target {
            Target::Id(id) => {
                let replay = self.loader.try_load(&id).await?;
                let head = replay.head;
                (id, replay.into_entity(), head)
            }
            Target::Loaded(entity) => {
                let head = entity.head_revision();
                (entity.aggregate.clone(), Some(entity), head)
            }
        };

        let env = CommandEnv::new(
            Arc::clone(self.loader.store()),
            aggregate.clone(),
            command,
            head,
            correlation_id,
        );
        let observer = env.clone();

        prepared(env, entity.clone()).await?;

        let appends = observer.appends().await;
        if appends > 0 {
            info!(appends, "Command appended events");
            Ok(self.loader.load(&aggregate).await?)
        } else {
            debug!("Command appended nothing");
            entity.ok_or(CommandError::NotAvailable(aggregate))
        }
    }
}
