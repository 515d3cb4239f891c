//! Entity descriptions: everything the runtime needs to know about one
//! entity type, assembled once with [`EntityDescriptionBuilder`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use common::AggregateId;
use event_store::RecordedEvent;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dispatcher::CommandEnv;
use crate::entity::Entity;
use crate::error::CommandError;
use crate::schema::{PayloadSchema, ValidationError};

pub(crate) type Seed<S> = Arc<dyn Fn(&AggregateId) -> S + Send + Sync>;
pub(crate) type Initializer<S> =
    Arc<dyn Fn(&RecordedEvent) -> Result<S, serde_json::Error> + Send + Sync>;
pub(crate) type Reducer<S> =
    Arc<dyn Fn(S, &RecordedEvent) -> Result<S, serde_json::Error> + Send + Sync>;

pub(crate) type HandlerFuture<E> = BoxFuture<'static, Result<(), CommandError<E>>>;

/// A command whose payload has been decoded and is ready to run.
pub(crate) type PreparedCommand<S, E> =
    Box<dyn FnOnce(CommandEnv, Option<Entity<S>>) -> HandlerFuture<E> + Send>;

pub(crate) type Handler<S, E> =
    Arc<dyn Fn(Value) -> Result<PreparedCommand<S, E>, ValidationError> + Send + Sync>;

pub(crate) struct CommandRegistration<S, E> {
    pub(crate) schema: PayloadSchema,
    pub(crate) handler: Handler<S, E>,
    pub(crate) creates: bool,
}

/// Immutable description of an entity type.
///
/// `S` is the state folded from events; `E` is the rejection type its
/// command handlers return.
pub struct EntityDescription<S, E> {
    entity_type: String,
    state_schema: PayloadSchema,
    seed: Option<Seed<S>>,
    initializers: HashMap<String, Initializer<S>>,
    reducers: HashMap<String, Reducer<S>>,
    event_schemas: BTreeMap<String, PayloadSchema>,
    commands: BTreeMap<String, CommandRegistration<S, E>>,
}

impl<S, E> EntityDescription<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn builder(entity_type: impl Into<String>) -> EntityDescriptionBuilder<S, E> {
        EntityDescriptionBuilder {
            description: EntityDescription {
                entity_type: entity_type.into(),
                state_schema: PayloadSchema::any(),
                seed: None,
                initializers: HashMap::new(),
                reducers: HashMap::new(),
                event_schemas: BTreeMap::new(),
                commands: BTreeMap::new(),
            },
        }
    }
}

impl<S, E> EntityDescription<S, E> {
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn state_schema(&self) -> &PayloadSchema {
        &self.state_schema
    }

    /// Declared event payload schemas, keyed by event type.
    pub fn event_schemas(&self) -> &BTreeMap<String, PayloadSchema> {
        &self.event_schemas
    }

    /// Command payload schemas, keyed by command name.
    pub fn command_schemas(&self) -> BTreeMap<&str, &PayloadSchema> {
        self.commands
            .iter()
            .map(|(name, registration)| (name.as_str(), &registration.schema))
            .collect()
    }

    /// Returns true if `command` is registered as a creation command.
    pub fn is_creation_command(&self, command: &str) -> bool {
        self.commands.get(command).is_some_and(|r| r.creates)
    }

    pub(crate) fn seed(&self) -> Option<&Seed<S>> {
        self.seed.as_ref()
    }

    pub(crate) fn initializer(&self, event_type: &str) -> Option<&Initializer<S>> {
        self.initializers.get(event_type)
    }

    pub(crate) fn reducer(&self, event_type: &str) -> Option<&Reducer<S>> {
        self.reducers.get(event_type)
    }

    pub(crate) fn command(&self, name: &str) -> Option<&CommandRegistration<S, E>> {
        self.commands.get(name)
    }
}

impl<S, E> std::fmt::Debug for EntityDescription<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescription")
            .field("entity_type", &self.entity_type)
            .field("seeded", &self.seed.is_some())
            .field("initializers", &self.initializers.keys().collect::<Vec<_>>())
            .field("reducers", &self.reducers.keys().collect::<Vec<_>>())
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fluent builder for [`EntityDescription`].
///
/// Registering the same event type or command name twice replaces the
/// earlier registration.
pub struct EntityDescriptionBuilder<S, E> {
    description: EntityDescription<S, E>,
}

impl<S, E> EntityDescriptionBuilder<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn state_schema(mut self, schema: PayloadSchema) -> Self {
        self.description.state_schema = schema;
        self
    }

    /// Produces state before any event, so the entity always exists.
    pub fn seed<F>(mut self, seed: F) -> Self
    where
        F: Fn(&AggregateId) -> S + Send + Sync + 'static,
    {
        self.description.seed = Some(Arc::new(seed));
        self
    }

    /// Documents the payload shape of an event type.
    pub fn event(mut self, event_type: impl Into<String>, schema: PayloadSchema) -> Self {
        self.description
            .event_schemas
            .insert(event_type.into(), schema);
        self
    }

    /// Creates state from the first event of `event_type`.
    pub fn initializer<P, F>(mut self, event_type: impl Into<String>, init: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(P) -> S + Send + Sync + 'static,
    {
        let init: Initializer<S> = Arc::new(move |event: &RecordedEvent| -> Result<S, serde_json::Error> {
            Ok(init(event.data_as::<P>()?))
        });
        self.description
            .initializers
            .insert(event_type.into(), init);
        self
    }

    /// Folds an event of `event_type` into existing state.
    pub fn reducer<P, F>(mut self, event_type: impl Into<String>, reduce: F) -> Self
    where
        P: DeserializeOwned,
        F: Fn(S, P) -> S + Send + Sync + 'static,
    {
        let reduce: Reducer<S> =
            Arc::new(move |state: S, event: &RecordedEvent| -> Result<S, serde_json::Error> {
                Ok(reduce(state, event.data_as::<P>()?))
            });
        self.description
            .reducers
            .insert(event_type.into(), reduce);
        self
    }

    /// Registers a command that only applies to an existing entity.
    pub fn command<C, F, Fut>(self, name: impl Into<String>, schema: PayloadSchema, handler: F) -> Self
    where
        C: DeserializeOwned + Send + 'static,
        F: Fn(CommandEnv, Entity<S>, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError<E>>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let prepare: Handler<S, E> = Arc::new(
            move |payload: Value| -> Result<PreparedCommand<S, E>, ValidationError> {
                let command = decode::<C>(payload)?;
                let handler = Arc::clone(&handler);
                Ok(Box::new(
                    move |env: CommandEnv, entity: Option<Entity<S>>| -> HandlerFuture<E> {
                        Box::pin(async move {
                            let Some(entity) = entity else {
                                return Err(CommandError::NotAvailable(env.aggregate().clone()));
                            };
                            handler(env, entity, command).await
                        })
                    },
                ))
            },
        );
        self.register(name.into(), schema, prepare, false)
    }

    /// Registers a command that may run before the entity exists.
    pub fn creation_command<C, F, Fut>(
        self,
        name: impl Into<String>,
        schema: PayloadSchema,
        handler: F,
    ) -> Self
    where
        C: DeserializeOwned + Send + 'static,
        F: Fn(CommandEnv, Option<Entity<S>>, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommandError<E>>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let prepare: Handler<S, E> = Arc::new(
            move |payload: Value| -> Result<PreparedCommand<S, E>, ValidationError> {
                let command = decode::<C>(payload)?;
                let handler = Arc::clone(&handler);
                Ok(Box::new(
                    move |env: CommandEnv, entity: Option<Entity<S>>| -> HandlerFuture<E> {
                        Box::pin(handler(env, entity, command))
                    },
                ))
            },
        );
        self.register(name.into(), schema, prepare, true)
    }

    fn register(
        mut self,
        name: String,
        schema: PayloadSchema,
        handler: Handler<S, E>,
        creates: bool,
    ) -> Self {
        self.description.commands.insert(
            name,
            CommandRegistration {
                schema,
                handler,
                creates,
            },
        );
        self
    }

    pub fn build(self) -> EntityDescription<S, E> {
        self.description
    }
}

fn decode<C: DeserializeOwned>(payload: Value) -> Result<C, ValidationError> {
    serde_json::from_value(payload).map_err(|e| ValidationError::from_decode(&e))
}
