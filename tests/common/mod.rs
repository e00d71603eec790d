//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use sqlx::PgPool;
use tempfile::TempDir;

use event_core::broker::{BrokerBehavior, InMemoryBroker};
use event_core::event_store::{FilesystemStorage, InMemoryStorage};
use event_core::serializer::JsonSerializer;
use event_core::terminal::{BrokerTerminal, PublicationMode, TerminalConfig};
use event_core::{DomainEventMessage, DomainEventStream, EventPipeline, EventStore, UnitOfWorkContext};

pub const AGGREGATE_TYPE: &str = "Order";

/// Events `range` of one order aggregate
pub fn order_events(identifier: &str, range: std::ops::Range<i64>) -> Vec<DomainEventMessage> {
    range
        .map(|seq| {
            DomainEventMessage::new(
                AGGREGATE_TYPE,
                identifier,
                seq,
                "shop.orders.LineAdded",
                serde_json::json!({ "line": seq, "sku": format!("SKU-{}", seq) }),
            )
        })
        .collect()
}

pub fn sequences(stream: DomainEventStream) -> Vec<i64> {
    stream.map(|e| e.sequence_number()).collect()
}

/// Filesystem store in a fresh temporary directory
pub fn filesystem_store() -> (TempDir, EventStore<FilesystemStorage>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let storage = FilesystemStorage::new(dir.path(), Arc::new(JsonSerializer::new()));
    (dir, EventStore::new(storage))
}

/// In-memory store, broker and terminal wired into a unit of work pipeline
pub struct TestRig {
    pub store: Arc<EventStore<InMemoryStorage>>,
    pub broker: InMemoryBroker,
    pub terminal: Arc<BrokerTerminal<InMemoryBroker>>,
}

impl TestRig {
    pub fn new(mode: PublicationMode, behavior: BrokerBehavior) -> Self {
        let broker = InMemoryBroker::with_behavior(behavior);
        let config = TerminalConfig {
            mode,
            ..Default::default()
        };
        Self {
            store: Arc::new(EventStore::new(InMemoryStorage::new())),
            terminal: Arc::new(BrokerTerminal::new(broker.clone(), config)),
            broker,
        }
    }

    /// Context whose units of work append and publish on commit
    pub fn context(&self) -> UnitOfWorkContext {
        let pipeline = EventPipeline::with_terminal(self.store.clone(), self.terminal.clone());
        UnitOfWorkContext::new(Arc::new(pipeline))
    }
}

/// Setup test database - make sure the event store schema exists
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let config = event_core::Config::from_vars(|key| match key {
        "EVENT_STORE_BACKEND" => Some("postgres".to_string()),
        "DATABASE_MAX_CONNECTIONS" => Some("5".to_string()),
        _ => std::env::var(key).ok(),
    })
    .expect("DATABASE_URL must be set for tests");

    let pool = event_core::db::connect(&config)
        .await
        .expect("Failed to connect to DB");

    event_core::db::ensure_schema(&pool)
        .await
        .expect("Failed to create event store schema");

    pool
}
