//! Runtime error types.

use entity::{CommandError, EntityError, SerializerError};
use thiserror::Error;
use worker_pool::PoolError;

use crate::config::ConfigError;

/// Errors returned by the runtime facade, keeping each failure's kind.
#[derive(Debug, Error)]
pub enum RuntimeError<E> {
    /// Dispatch failed: validation, rejection, conflict or storage.
    #[error(transparent)]
    Command(#[from] CommandError<E>),

    /// The worker pool refused or timed out the work.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The runtime was configured with unusable values.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl<E> RuntimeError<E> {
    /// Returns true if the caller should fix the request rather than retry.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RuntimeError::Command(e) if e.is_client_error())
    }

    /// Returns true if the runtime was over capacity or shutting down.
    pub fn is_capacity(&self) -> bool {
        matches!(self, RuntimeError::Pool(_))
    }

    /// Returns the entity's rejection, if that is what this is.
    pub fn rejection(&self) -> Option<&E> {
        match self {
            RuntimeError::Command(CommandError::Rejected(e)) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<EntityError> for RuntimeError<E> {
    fn from(error: EntityError) -> Self {
        RuntimeError::Command(error.into())
    }
}

impl<E> From<SerializerError> for RuntimeError<E> {
    fn from(error: SerializerError) -> Self {
        RuntimeError::Command(error.into())
    }
}
