//! Domain module
//!
//! Event messages and streams shared by the store, unit of work and terminal.

pub mod message;
pub mod meta_data;
pub mod stream;

pub use message::DomainEventMessage;
pub use meta_data::MetaData;
pub use stream::DomainEventStream;
