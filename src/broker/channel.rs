//! Broker channel abstraction
//!
//! The operations a publication terminal needs from an AMQP-style broker:
//! basic publish, channel transactions and publisher confirms.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::BrokerError;

/// AMQP delivery mode for messages that do not survive a broker restart
pub const TRANSIENT_DELIVERY_MODE: u8 = 1;
/// AMQP delivery mode for messages persisted by the broker
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Message properties sent alongside the body
#[derive(Debug, Clone, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub delivery_mode: u8,
    pub headers: HashMap<String, String>,
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self {
            content_type: None,
            message_id: None,
            timestamp: None,
            delivery_mode: TRANSIENT_DELIVERY_MODE,
            headers: HashMap::new(),
        }
    }
}

/// A message ready to be handed to the broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
    pub properties: MessageProperties,
}

impl BrokerMessage {
    pub fn new(body: Vec<u8>, routing_key: impl Into<String>) -> Self {
        Self {
            body,
            routing_key: routing_key.into(),
            mandatory: false,
            immediate: false,
            properties: MessageProperties::default(),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.properties.delivery_mode == PERSISTENT_DELIVERY_MODE
    }
}

/// A channel on a broker connection.
///
/// A channel is used by one task at a time and is either transactional
/// (after `tx_select`) or in confirm mode (after `confirm_select`), never both.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn basic_publish(
        &mut self,
        exchange: &str,
        message: BrokerMessage,
    ) -> Result<(), BrokerError>;

    async fn tx_select(&mut self) -> Result<(), BrokerError>;

    async fn tx_commit(&mut self) -> Result<(), BrokerError>;

    async fn tx_rollback(&mut self) -> Result<(), BrokerError>;

    async fn confirm_select(&mut self) -> Result<(), BrokerError>;

    /// Wait until every published message is confirmed.
    ///
    /// `None` waits indefinitely.
    async fn wait_for_confirms(&mut self, timeout: Option<Duration>) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

/// Opens channels on a broker connection
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    type Channel: BrokerChannel + 'static;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;
}
