//! Event pipeline
//!
//! Commit handler that appends each staged batch to the event store and then
//! publishes everything through the terminal within the committing unit of work.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::DomainEventMessage;
use crate::event_store::{EventStorage, EventStore};
use crate::terminal::EventBusTerminal;
use crate::unit_of_work::{CommitError, CommitHandler, StagedEvents, UnitOfWork};

/// Store-then-publish commit step
pub struct EventPipeline<S> {
    store: Arc<EventStore<S>>,
    terminal: Option<Arc<dyn EventBusTerminal>>,
}

impl<S: EventStorage> EventPipeline<S> {
    /// Pipeline that only persists
    pub fn new(store: Arc<EventStore<S>>) -> Self {
        Self {
            store,
            terminal: None,
        }
    }

    /// Pipeline that persists and then publishes
    pub fn with_terminal(store: Arc<EventStore<S>>, terminal: Arc<dyn EventBusTerminal>) -> Self {
        Self {
            store,
            terminal: Some(terminal),
        }
    }

    pub fn store(&self) -> &Arc<EventStore<S>> {
        &self.store
    }
}

#[async_trait]
impl<S: EventStorage + 'static> CommitHandler for EventPipeline<S> {
    async fn commit(
        &self,
        staged: &[StagedEvents],
        unit_of_work: &mut UnitOfWork,
    ) -> Result<(), CommitError> {
        for batch in staged {
            self.store
                .append_events(&batch.aggregate_type, batch.events.clone().into())
                .await?;
        }

        if let Some(terminal) = &self.terminal {
            let events: Vec<DomainEventMessage> = staged
                .iter()
                .flat_map(|batch| batch.events.iter().cloned())
                .collect();
            terminal.publish(&events, Some(unit_of_work)).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryStorage;
    use crate::unit_of_work::UnitOfWorkContext;

    fn created(identifier: &str) -> DomainEventMessage {
        DomainEventMessage::new("Order", identifier, 0, "orders.Created", serde_json::Value::Null)
    }

    #[tokio::test]
    async fn test_commit_appends_every_batch() {
        let store = Arc::new(EventStore::new(InMemoryStorage::new()));
        let mut context = UnitOfWorkContext::new(Arc::new(EventPipeline::new(store.clone())));

        let uow = context.start().unwrap();
        uow.stage_events("Order", vec![created("A1")]).unwrap();
        uow.stage_events("Order", vec![created("A2")]).unwrap();
        context.commit().await.unwrap();

        assert_eq!(store.storage().stream_count(), 2);
    }

    #[tokio::test]
    async fn test_conflict_fails_commit() {
        let store = Arc::new(EventStore::new(InMemoryStorage::new()));
        store
            .append_events("Order", vec![created("A1")].into())
            .await
            .unwrap();
        let mut context = UnitOfWorkContext::new(Arc::new(EventPipeline::new(store.clone())));

        context
            .start()
            .unwrap()
            .stage_events("Order", vec![created("A1")])
            .unwrap();
        let err = context.commit().await.unwrap_err();

        assert!(err.is_conflict());
        assert!(!context.is_started());
    }
}
