//! Unit of Work
//!
//! Groups event appends and publications so they succeed or fail together.
//! Collaborators attach listeners to the commit and rollback phases; the
//! physical commit is delegated to a [`CommitHandler`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::DomainEventMessage;

use super::{CommitError, RollbackCause, UnitOfWorkError, UnitOfWorkListener};

/// Lifecycle of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Idle,
    Started,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl UnitOfWorkState {
    /// Committed and RolledBack are final
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Events recorded for one aggregate, persisted when the unit of work commits
#[derive(Debug, Clone)]
pub struct StagedEvents {
    pub aggregate_type: String,
    pub events: Vec<DomainEventMessage>,
}

/// Performs the physical commit of the staged events.
///
/// Receives the unit of work itself so it can register listeners that must
/// see the final outcome (a publication channel, for instance).
#[async_trait]
pub trait CommitHandler: Send + Sync {
    async fn commit(
        &self,
        staged: &[StagedEvents],
        unit_of_work: &mut UnitOfWork,
    ) -> Result<(), CommitError>;
}

/// A unit of work
pub struct UnitOfWork {
    id: Uuid,
    state: UnitOfWorkState,
    listeners: Vec<Box<dyn UnitOfWorkListener>>,
    staged: Vec<StagedEvents>,
    commit_handler: Option<Arc<dyn CommitHandler>>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .field("staged", &self.staged.len())
            .field("has_commit_handler", &self.commit_handler.is_some())
            .finish()
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork {
    /// Create an idle unit of work that only drives its listeners on commit
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: UnitOfWorkState::Idle,
            listeners: Vec::new(),
            staged: Vec::new(),
            commit_handler: None,
        }
    }

    /// Create an idle unit of work whose commit goes through `handler`
    pub fn with_commit_handler(handler: Arc<dyn CommitHandler>) -> Self {
        Self {
            commit_handler: Some(handler),
            ..Self::new()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == UnitOfWorkState::Started
    }

    /// Whether `register_listener` would currently succeed
    pub fn accepts_listeners(&self) -> bool {
        matches!(
            self.state,
            UnitOfWorkState::Started | UnitOfWorkState::Committing
        )
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Events waiting for the commit
    pub fn staged_events(&self) -> &[StagedEvents] {
        &self.staged
    }

    /// Move from Idle to Started
    pub fn start(&mut self) -> Result<(), UnitOfWorkError> {
        if self.state != UnitOfWorkState::Idle {
            return Err(UnitOfWorkError::invalid_state("start", self.state));
        }
        self.state = UnitOfWorkState::Started;
        tracing::debug!(unit_of_work = %self.id, "Unit of work started");
        Ok(())
    }

    /// Attach a listener. Accepted while started or committing.
    pub fn register_listener<L>(&mut self, listener: L) -> Result<(), UnitOfWorkError>
    where
        L: UnitOfWorkListener + 'static,
    {
        if !self.accepts_listeners() {
            return Err(UnitOfWorkError::invalid_state(
                "register a listener on",
                self.state,
            ));
        }
        self.listeners.push(Box::new(listener));
        Ok(())
    }

    /// Record events of one aggregate for the commit
    pub fn stage_events(
        &mut self,
        aggregate_type: impl Into<String>,
        events: Vec<DomainEventMessage>,
    ) -> Result<(), UnitOfWorkError> {
        if self.state != UnitOfWorkState::Started {
            return Err(UnitOfWorkError::invalid_state("stage events on", self.state));
        }
        if !events.is_empty() {
            self.staged.push(StagedEvents {
                aggregate_type: aggregate_type.into(),
                events,
            });
        }
        Ok(())
    }

    /// Commit the unit of work.
    ///
    /// Prepare hooks run in registration order and any of them may veto.
    /// Then the commit handler runs; listeners it registers join the end of
    /// the list. On failure every listener sees `on_rollback` in reverse
    /// order. After success every listener sees `after_commit` in order.
    pub async fn commit(&mut self) -> Result<(), UnitOfWorkError> {
        if self.state != UnitOfWorkState::Started {
            return Err(UnitOfWorkError::invalid_state("commit", self.state));
        }
        self.state = UnitOfWorkState::Committing;
        tracing::debug!(unit_of_work = %self.id, "Committing unit of work");

        let staged = std::mem::take(&mut self.staged);
        let mut listeners = std::mem::take(&mut self.listeners);

        let mut veto = None;
        for listener in listeners.iter_mut() {
            if let Err(e) = listener.on_prepare_commit(self, &staged).await {
                veto = Some(e);
                break;
            }
        }
        if let Some(e) = veto {
            tracing::warn!(
                unit_of_work = %self.id,
                error = %e,
                "Commit vetoed during prepare"
            );
            let cause: RollbackCause<'_> = &*e;
            self.roll_back_listeners(listeners, Some(cause)).await;
            return Err(UnitOfWorkError::PrepareCommitFailed(e));
        }

        if let Some(handler) = self.commit_handler.clone() {
            let result = handler.commit(&staged, self).await;
            listeners.append(&mut self.listeners);

            if let Err(e) = result {
                tracing::warn!(
                    unit_of_work = %self.id,
                    error = %e,
                    "Commit failed, rolling back"
                );
                let cause: RollbackCause<'_> = &e;
                self.roll_back_listeners(listeners, Some(cause)).await;
                return Err(UnitOfWorkError::CommitFailed(e));
            }
        }

        self.state = UnitOfWorkState::Committed;

        for listener in listeners.iter_mut() {
            if let Err(e) = listener.after_commit(self).await {
                tracing::warn!(
                    unit_of_work = %self.id,
                    error = %e,
                    "After-commit listener failed"
                );
            }
        }

        tracing::info!(
            unit_of_work = %self.id,
            aggregates = staged.len(),
            event_count = staged.iter().map(|s| s.events.len()).sum::<usize>(),
            "Unit of work committed"
        );

        Ok(())
    }

    /// Roll back the unit of work.
    ///
    /// Never fails. Calling it on a unit of work that is not active logs and
    /// does nothing.
    pub async fn rollback(&mut self, cause: Option<RollbackCause<'_>>) {
        match self.state {
            UnitOfWorkState::Started | UnitOfWorkState::Committing => {}
            state => {
                tracing::warn!(
                    unit_of_work = %self.id,
                    state = ?state,
                    "Ignoring rollback of inactive unit of work"
                );
                return;
            }
        }

        self.staged.clear();
        let listeners = std::mem::take(&mut self.listeners);
        self.roll_back_listeners(listeners, cause).await;
    }

    /// Hand listeners and staged events to the enclosing unit of work
    pub(crate) fn commit_into(&mut self, outer: &mut UnitOfWork) -> Result<(), UnitOfWorkError> {
        if self.state != UnitOfWorkState::Started {
            return Err(UnitOfWorkError::invalid_state("commit", self.state));
        }
        if outer.state != UnitOfWorkState::Started {
            return Err(UnitOfWorkError::invalid_state("merge into", outer.state));
        }

        outer.listeners.append(&mut self.listeners);
        outer.staged.append(&mut self.staged);
        self.state = UnitOfWorkState::Committed;

        tracing::debug!(
            unit_of_work = %self.id,
            outer = %outer.id,
            "Nested unit of work merged into outer"
        );
        Ok(())
    }

    async fn roll_back_listeners(
        &mut self,
        mut listeners: Vec<Box<dyn UnitOfWorkListener>>,
        cause: Option<RollbackCause<'_>>,
    ) {
        self.state = UnitOfWorkState::RollingBack;

        for listener in listeners.iter_mut().rev() {
            if let Err(e) = listener.on_rollback(self, cause).await {
                tracing::warn!(unit_of_work = %self.id, error = %e, "Rollback listener failed");
            }
        }

        self.state = UnitOfWorkState::RolledBack;
        tracing::info!(unit_of_work = %self.id, "Unit of work rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_of_work::HookError;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        veto: bool,
        fail_after_commit: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: journal.clone(),
                veto: false,
                fail_after_commit: false,
            }
        }

        fn record(&self, hook: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, hook));
        }
    }

    #[async_trait]
    impl UnitOfWorkListener for Recorder {
        async fn on_prepare_commit(
            &mut self,
            _unit_of_work: &UnitOfWork,
            _staged: &[StagedEvents],
        ) -> Result<(), HookError> {
            self.record("prepare");
            if self.veto {
                return Err("vetoed".into());
            }
            Ok(())
        }

        async fn after_commit(&mut self, _unit_of_work: &UnitOfWork) -> Result<(), HookError> {
            self.record("after_commit");
            if self.fail_after_commit {
                return Err("ack lost".into());
            }
            Ok(())
        }

        async fn on_rollback(
            &mut self,
            _unit_of_work: &UnitOfWork,
            _cause: Option<RollbackCause<'_>>,
        ) -> Result<(), HookError> {
            self.record("rollback");
            Ok(())
        }
    }

    /// Handler that registers a late listener and optionally fails
    struct LateHandler {
        journal: Journal,
        fail: bool,
    }

    #[async_trait]
    impl CommitHandler for LateHandler {
        async fn commit(
            &self,
            staged: &[StagedEvents],
            unit_of_work: &mut UnitOfWork,
        ) -> Result<(), CommitError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("handler:{}", staged.len()));
            unit_of_work
                .register_listener(Recorder::new("late", &self.journal))
                .expect("registration during commit");
            if self.fail {
                return Err(crate::event_store::EventStoreError::conflicting_modification(
                    "Order", "A1",
                )
                .into());
            }
            Ok(())
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    fn event(seq: i64) -> DomainEventMessage {
        DomainEventMessage::new("Order", "A1", seq, "orders.Created", serde_json::Value::Null)
    }

    #[tokio::test]
    async fn test_commit_runs_hooks_in_order() {
        let journal = Journal::default();
        let mut uow = UnitOfWork::new();
        uow.start().unwrap();
        uow.register_listener(Recorder::new("a", &journal)).unwrap();
        uow.register_listener(Recorder::new("b", &journal)).unwrap();

        uow.commit().await.unwrap();

        assert_eq!(uow.state(), UnitOfWorkState::Committed);
        assert_eq!(
            entries(&journal),
            vec!["a:prepare", "b:prepare", "a:after_commit", "b:after_commit"]
        );
    }

    #[tokio::test]
    async fn test_prepare_veto_rolls_back_in_reverse() {
        let journal = Journal::default();
        let handler = Arc::new(LateHandler {
            journal: journal.clone(),
            fail: false,
        });
        let mut uow = UnitOfWork::with_commit_handler(handler);
        uow.start().unwrap();
        uow.register_listener(Recorder::new("a", &journal)).unwrap();
        let mut vetoing = Recorder::new("b", &journal);
        vetoing.veto = true;
        uow.register_listener(vetoing).unwrap();
        uow.register_listener(Recorder::new("c", &journal)).unwrap();

        let err = uow.commit().await.unwrap_err();

        assert!(matches!(err, UnitOfWorkError::PrepareCommitFailed(_)));
        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(
            entries(&journal),
            vec!["a:prepare", "b:prepare", "c:rollback", "b:rollback", "a:rollback"]
        );
    }

    #[tokio::test]
    async fn test_commit_handler_sees_staged_events_and_late_listener() {
        let journal = Journal::default();
        let handler = Arc::new(LateHandler {
            journal: journal.clone(),
            fail: false,
        });
        let mut uow = UnitOfWork::with_commit_handler(handler);
        uow.start().unwrap();
        uow.stage_events("Order", vec![event(0), event(1)]).unwrap();
        uow.register_listener(Recorder::new("a", &journal)).unwrap();

        uow.commit().await.unwrap();

        assert_eq!(
            entries(&journal),
            vec!["a:prepare", "handler:1", "a:after_commit", "late:after_commit"]
        );
        assert!(uow.staged_events().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back_late_listener_too() {
        let journal = Journal::default();
        let handler = Arc::new(LateHandler {
            journal: journal.clone(),
            fail: true,
        });
        let mut uow = UnitOfWork::with_commit_handler(handler);
        uow.start().unwrap();
        uow.register_listener(Recorder::new("a", &journal)).unwrap();

        let err = uow.commit().await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(
            entries(&journal),
            vec!["a:prepare", "handler:0", "late:rollback", "a:rollback"]
        );
    }

    #[tokio::test]
    async fn test_after_commit_failure_is_swallowed() {
        let journal = Journal::default();
        let mut uow = UnitOfWork::new();
        uow.start().unwrap();
        let mut failing = Recorder::new("a", &journal);
        failing.fail_after_commit = true;
        uow.register_listener(failing).unwrap();
        uow.register_listener(Recorder::new("b", &journal)).unwrap();

        uow.commit().await.unwrap();

        assert_eq!(uow.state(), UnitOfWorkState::Committed);
        assert!(entries(&journal).contains(&"b:after_commit".to_string()));
    }

    #[tokio::test]
    async fn test_rollback_notifies_once() {
        let journal = Journal::default();
        let mut uow = UnitOfWork::new();
        uow.start().unwrap();
        uow.register_listener(Recorder::new("a", &journal)).unwrap();
        uow.register_listener(Recorder::new("b", &journal)).unwrap();

        uow.rollback(None).await;
        uow.rollback(None).await;

        assert_eq!(uow.state(), UnitOfWorkState::RolledBack);
        assert_eq!(entries(&journal), vec!["b:rollback", "a:rollback"]);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let journal = Journal::default();
        let mut uow = UnitOfWork::new();

        assert!(uow.register_listener(Recorder::new("a", &journal)).is_err());
        assert!(uow.stage_events("Order", vec![event(0)]).is_err());
        assert!(matches!(
            uow.commit().await,
            Err(UnitOfWorkError::InvalidState { operation: "commit", .. })
        ));

        uow.start().unwrap();
        assert!(uow.start().is_err());
        uow.commit().await.unwrap();
        assert!(uow.commit().await.is_err());
        assert!(uow.state().is_terminal());
    }
}
