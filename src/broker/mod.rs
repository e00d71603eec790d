//! Broker module
//!
//! Channel-level abstraction over a message broker plus an in-memory broker
//! used by tests and local runs.

mod channel;
mod error;
mod memory;

pub use channel::{
    BrokerChannel, BrokerMessage, ChannelFactory, MessageProperties, PERSISTENT_DELIVERY_MODE,
    TRANSIENT_DELIVERY_MODE,
};
pub use error::BrokerError;
pub use memory::{AckBehavior, BrokerBehavior, DeliveredMessage, InMemoryBroker, InMemoryChannel};
