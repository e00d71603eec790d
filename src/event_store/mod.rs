//! Event Store module
//!
//! Persistence layer for Event Sourcing.
//! Stores aggregate event streams and snapshots on a pluggable medium:
//! memory, the local filesystem or PostgreSQL.

mod error;
mod filesystem;
mod locks;
mod memory;
mod postgres;
mod storage;
mod store;

pub use error::EventStoreError;
pub use filesystem::FilesystemStorage;
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use storage::{AggregateStreamHandle, EventStorage};
pub use store::EventStore;
