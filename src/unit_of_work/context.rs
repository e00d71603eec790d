//! Unit of Work Context
//!
//! Tracks the current unit of work of one logical flow of execution. The
//! context is owned by that flow and passed along explicitly, so "current"
//! never leaks between tasks.

use std::sync::Arc;

use super::{CommitHandler, RollbackCause, UnitOfWork, UnitOfWorkError};

/// Stack of active units of work, innermost last
#[derive(Default)]
pub struct UnitOfWorkContext {
    commit_handler: Option<Arc<dyn CommitHandler>>,
    stack: Vec<UnitOfWork>,
}

impl std::fmt::Debug for UnitOfWorkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkContext")
            .field("has_commit_handler", &self.commit_handler.is_some())
            .field("stack", &self.stack)
            .finish()
    }
}

impl UnitOfWorkContext {
    /// Create a context whose outermost units of work commit through `handler`
    pub fn new(handler: Arc<dyn CommitHandler>) -> Self {
        Self {
            commit_handler: Some(handler),
            stack: Vec::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Number of nested units of work currently active
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn current(&self) -> Option<&UnitOfWork> {
        self.stack.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut UnitOfWork> {
        self.stack.last_mut()
    }

    /// Start a unit of work. Fails if one is already current.
    pub fn start(&mut self) -> Result<&mut UnitOfWork, UnitOfWorkError> {
        if self.is_started() {
            return Err(UnitOfWorkError::AlreadyStarted);
        }
        self.push()
    }

    /// Start a unit of work inside the current one, or a top-level one if
    /// none is current.
    pub fn start_nested(&mut self) -> Result<&mut UnitOfWork, UnitOfWorkError> {
        self.push()
    }

    /// Commit the current unit of work and make its parent current again.
    ///
    /// A nested unit of work hands its listeners and staged events to its
    /// parent; they are committed or rolled back together with it.
    pub async fn commit(&mut self) -> Result<UnitOfWork, UnitOfWorkError> {
        let mut unit = self.stack.pop().ok_or(UnitOfWorkError::NotStarted)?;
        match self.stack.last_mut() {
            Some(outer) => unit.commit_into(outer)?,
            None => unit.commit().await?,
        }
        Ok(unit)
    }

    /// Roll back only the current unit of work and make its parent current again
    pub async fn rollback(
        &mut self,
        cause: Option<RollbackCause<'_>>,
    ) -> Result<UnitOfWork, UnitOfWorkError> {
        let mut unit = self.stack.pop().ok_or(UnitOfWorkError::NotStarted)?;
        unit.rollback(cause).await;
        Ok(unit)
    }

    fn push(&mut self) -> Result<&mut UnitOfWork, UnitOfWorkError> {
        let mut unit = match (&self.commit_handler, self.stack.is_empty()) {
            (Some(handler), true) => UnitOfWork::with_commit_handler(handler.clone()),
            _ => UnitOfWork::new(),
        };
        unit.start()?;

        let index = self.stack.len();
        self.stack.push(unit);
        Ok(&mut self.stack[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_of_work::{HookError, UnitOfWorkListener, UnitOfWorkState};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Outcome(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl UnitOfWorkListener for Outcome {
        async fn after_commit(&mut self, _unit_of_work: &UnitOfWork) -> Result<(), HookError> {
            self.0.lock().unwrap().push("committed");
            Ok(())
        }

        async fn on_rollback(
            &mut self,
            _unit_of_work: &UnitOfWork,
            _cause: Option<RollbackCause<'_>>,
        ) -> Result<(), HookError> {
            self.0.lock().unwrap().push("rolled back");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut context = UnitOfWorkContext::default();
        context.start().unwrap();
        assert!(matches!(context.start(), Err(UnitOfWorkError::AlreadyStarted)));
        assert_eq!(context.depth(), 1);
    }

    #[tokio::test]
    async fn test_commit_without_start_fails() {
        let mut context = UnitOfWorkContext::default();
        assert!(matches!(
            context.commit().await,
            Err(UnitOfWorkError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_nested_commit_defers_to_outer() {
        let inner_outcome = Outcome::default();
        let mut context = UnitOfWorkContext::default();
        context.start().unwrap();
        context
            .start_nested()
            .unwrap()
            .register_listener(inner_outcome.clone())
            .unwrap();
        assert_eq!(context.depth(), 2);

        let inner = context.commit().await.unwrap();
        assert_eq!(inner.state(), UnitOfWorkState::Committed);
        assert!(inner_outcome.0.lock().unwrap().is_empty());
        assert_eq!(context.current().unwrap().listener_count(), 1);

        context.commit().await.unwrap();
        assert_eq!(*inner_outcome.0.lock().unwrap(), vec!["committed"]);
        assert!(!context.is_started());
    }

    #[tokio::test]
    async fn test_nested_rollback_only_affects_inner() {
        let outer_outcome = Outcome::default();
        let inner_outcome = Outcome::default();
        let mut context = UnitOfWorkContext::default();
        context
            .start()
            .unwrap()
            .register_listener(outer_outcome.clone())
            .unwrap();
        context
            .start_nested()
            .unwrap()
            .register_listener(inner_outcome.clone())
            .unwrap();

        let inner = context.rollback(None).await.unwrap();
        assert_eq!(inner.state(), UnitOfWorkState::RolledBack);
        assert_eq!(*inner_outcome.0.lock().unwrap(), vec!["rolled back"]);

        assert!(context.current().unwrap().is_started());
        context.commit().await.unwrap();
        assert_eq!(*outer_outcome.0.lock().unwrap(), vec!["committed"]);
        assert_eq!(inner_outcome.0.lock().unwrap().len(), 1);
    }
}
