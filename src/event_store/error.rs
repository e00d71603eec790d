//! Event Store Errors
//!
//! Error types for event store operations.

use crate::serializer::SerializationError;

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// A new stream was appended for an aggregate that already has one
    #[error(
        "Could not create event stream for aggregate, such stream already exists, type={aggregate_type}, id={aggregate_identifier}"
    )]
    ConflictingModification {
        aggregate_type: String,
        aggregate_identifier: String,
    },

    /// No stream exists for the aggregate
    #[error("Event stream not found for aggregate, type={aggregate_type}, id={aggregate_identifier}")]
    EventStreamNotFound {
        aggregate_type: String,
        aggregate_identifier: String,
    },

    /// The appended stream is not a contiguous batch for a single aggregate
    #[error("Invalid event stream: {0}")]
    InvalidEventStream(String),

    /// Aggregate type or identifier cannot be mapped onto the storage medium
    #[error("Invalid aggregate reference: {0}")]
    InvalidIdentifier(String),

    /// Stored data could not be read back
    #[error("Corrupted event data: {0}")]
    Corrupted(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

impl EventStoreError {
    pub fn conflicting_modification(aggregate_type: &str, aggregate_identifier: &str) -> Self {
        Self::ConflictingModification {
            aggregate_type: aggregate_type.to_string(),
            aggregate_identifier: aggregate_identifier.to_string(),
        }
    }

    pub fn stream_not_found(aggregate_type: &str, aggregate_identifier: &str) -> Self {
        Self::EventStreamNotFound {
            aggregate_type: aggregate_type.to_string(),
            aggregate_identifier: aggregate_identifier.to_string(),
        }
    }

    /// Check if this error is a concurrency conflict
    pub fn is_conflicting_modification(&self) -> bool {
        matches!(self, EventStoreError::ConflictingModification { .. })
    }

    /// Check if this error reports a missing stream
    pub fn is_not_found(&self) -> bool {
        matches!(self, EventStoreError::EventStreamNotFound { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConflictingModification { .. }
                | EventStoreError::Database(_)
                | EventStoreError::Io(_)
        )
    }
}
