//! event_core Library
//!
//! Event store, unit of work and event bus terminal for event-sourced
//! systems. Re-exports modules for integration testing and external use.

pub mod broker;
pub mod config;
pub mod db;
pub mod domain;
pub mod event_store;
pub mod pipeline;
pub mod serializer;
pub mod terminal;
pub mod unit_of_work;

mod error;

pub use config::{Config, ConfigError, StorageBackend};
pub use domain::{DomainEventMessage, DomainEventStream, MetaData};
pub use error::{CoreError, CoreResult};
pub use event_store::{EventStoreError, EventStore};
pub use pipeline::EventPipeline;
pub use terminal::{EventBusTerminal, EventPublicationFailed, PublicationMode, TerminalConfig};
pub use unit_of_work::{UnitOfWork, UnitOfWorkContext, UnitOfWorkError};
