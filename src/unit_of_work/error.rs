//! Unit of Work Errors

use crate::event_store::EventStoreError;
use crate::terminal::EventPublicationFailed;

use super::UnitOfWorkState;

/// Failure raised by a listener hook or a cluster
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Cause handed to rollback hooks
pub type RollbackCause<'a> = &'a (dyn std::error::Error + Send + Sync + 'static);

/// Failures of the physical commit step
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Publication(#[from] EventPublicationFailed),
}

/// Errors that can occur while driving a unit of work
#[derive(Debug, thiserror::Error)]
pub enum UnitOfWorkError {
    /// Another unit of work is current and nesting was not requested
    #[error("A unit of work is already started in this context")]
    AlreadyStarted,

    /// No unit of work is current
    #[error("No unit of work is started in this context")]
    NotStarted,

    /// Operation not allowed in the current state
    #[error("Cannot {operation} a unit of work in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: UnitOfWorkState,
    },

    /// A prepare-commit listener vetoed the commit; nothing was committed
    #[error("Commit aborted by listener: {0}")]
    PrepareCommitFailed(#[source] HookError),

    /// The physical commit failed and the unit of work was rolled back
    #[error("Commit failed: {0}")]
    CommitFailed(#[source] CommitError),
}

impl UnitOfWorkError {
    pub(crate) fn invalid_state(operation: &'static str, state: UnitOfWorkState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Check if the failure came from a concurrent modification of an aggregate
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::CommitFailed(CommitError::EventStore(e)) if e.is_conflicting_modification()
        )
    }
}
