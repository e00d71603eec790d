//! Error handling module
//!
//! Crate-level error aggregating the module errors.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::event_store::EventStoreError;
use crate::serializer::SerializationError;
use crate::terminal::EventPublicationFailed;
use crate::unit_of_work::{CommitError, UnitOfWorkError};

/// Crate-wide Result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Crate-wide error types
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Publication(#[from] EventPublicationFailed),

    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CommitError> for CoreError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::EventStore(e) => CoreError::EventStore(e),
            CommitError::Publication(e) => CoreError::Publication(e),
        }
    }
}

impl CoreError {
    /// Check if this is a concurrent modification the caller can resolve by reloading
    pub fn is_conflict(&self) -> bool {
        match self {
            CoreError::EventStore(e) => e.is_conflicting_modification(),
            CoreError::UnitOfWork(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// Check if retrying the operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::EventStore(e) => e.is_retryable(),
            CoreError::Publication(e) => e.is_retryable(),
            CoreError::Broker(e) => e.is_retryable(),
            CoreError::UnitOfWork(UnitOfWorkError::CommitFailed(CommitError::EventStore(e))) => {
                e.is_retryable()
            }
            CoreError::UnitOfWork(UnitOfWorkError::CommitFailed(CommitError::Publication(e))) => {
                e.is_retryable()
            }
            CoreError::Database(_) => true,
            _ => false,
        }
    }
}
