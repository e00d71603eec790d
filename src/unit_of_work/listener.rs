//! Unit of Work Listeners
//!
//! Hooks collaborators attach to the commit and rollback phases.

use async_trait::async_trait;

use super::{HookError, RollbackCause, StagedEvents, UnitOfWork};

/// Listener notified of unit of work transitions.
///
/// Every hook defaults to doing nothing. A listener sees at most one of
/// `after_commit` and `on_rollback`, and each at most once.
#[async_trait]
pub trait UnitOfWorkListener: Send + Sync {
    /// Called before anything is committed. Returning an error vetoes the commit.
    async fn on_prepare_commit(
        &mut self,
        _unit_of_work: &UnitOfWork,
        _staged: &[StagedEvents],
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once the unit of work is committed. Failures are logged only.
    async fn after_commit(&mut self, _unit_of_work: &UnitOfWork) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the unit of work rolls back. Failures are logged only.
    async fn on_rollback(
        &mut self,
        _unit_of_work: &UnitOfWork,
        _cause: Option<RollbackCause<'_>>,
    ) -> Result<(), HookError> {
        Ok(())
    }
}
