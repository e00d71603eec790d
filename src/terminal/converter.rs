//! Message conversion
//!
//! Turns domain events into broker messages and back.

use std::sync::Arc;

use crate::broker::{
    BrokerError, BrokerMessage, MessageProperties, PERSISTENT_DELIVERY_MODE,
    TRANSIENT_DELIVERY_MODE,
};
use crate::domain::DomainEventMessage;
use crate::serializer::{JsonSerializer, Serializer};

pub const AGGREGATE_TYPE_HEADER: &str = "aggregate-type";
pub const AGGREGATE_IDENTIFIER_HEADER: &str = "aggregate-identifier";
pub const SEQUENCE_NUMBER_HEADER: &str = "sequence-number";
pub const PAYLOAD_TYPE_HEADER: &str = "payload-type";

/// Picks the routing key of an event
pub trait RoutingKeyResolver: Send + Sync {
    fn resolve_routing_key(&self, event: &DomainEventMessage) -> String;
}

/// Routes on the namespace of the payload type.
///
/// `orders.LineAdded` and `orders::LineAdded` both route to `orders`. A
/// payload type without a namespace routes on itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadTypeRoutingKeyResolver;

impl RoutingKeyResolver for PayloadTypeRoutingKeyResolver {
    fn resolve_routing_key(&self, event: &DomainEventMessage) -> String {
        let payload_type = event.payload_type();
        let dot = payload_type.rfind('.');
        let path = payload_type.rfind("::");
        let split = match (dot, path) {
            (Some(d), Some(p)) => Some(d.max(p)),
            (d, p) => d.or(p),
        };
        match split {
            Some(0) | None => payload_type.to_string(),
            Some(index) => payload_type[..index].to_string(),
        }
    }
}

/// Converts between domain events and broker messages
pub trait MessageConverter: Send + Sync {
    fn create_broker_message(&self, event: &DomainEventMessage)
        -> Result<BrokerMessage, BrokerError>;

    fn read_event_message(&self, message: &BrokerMessage)
        -> Result<DomainEventMessage, BrokerError>;
}

/// Serializer-backed converter with pluggable routing
#[derive(Clone)]
pub struct DefaultMessageConverter {
    serializer: Arc<dyn Serializer>,
    routing_key_resolver: Arc<dyn RoutingKeyResolver>,
    durable: bool,
}

impl Default for DefaultMessageConverter {
    fn default() -> Self {
        Self::new(Arc::new(JsonSerializer::new()))
    }
}

impl DefaultMessageConverter {
    /// Durable messages routed on the payload namespace
    pub fn new(serializer: Arc<dyn Serializer>) -> Self {
        Self {
            serializer,
            routing_key_resolver: Arc::new(PayloadTypeRoutingKeyResolver),
            durable: true,
        }
    }

    pub fn with_routing_key_resolver(mut self, resolver: Arc<dyn RoutingKeyResolver>) -> Self {
        self.routing_key_resolver = resolver;
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

impl std::fmt::Debug for DefaultMessageConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMessageConverter")
            .field("content_type", &self.serializer.content_type())
            .field("durable", &self.durable)
            .finish()
    }
}

impl MessageConverter for DefaultMessageConverter {
    fn create_broker_message(
        &self,
        event: &DomainEventMessage,
    ) -> Result<BrokerMessage, BrokerError> {
        let body = self.serializer.serialize(event)?;

        let mut properties = MessageProperties {
            content_type: Some(self.serializer.content_type().to_string()),
            message_id: Some(event.identifier().to_string()),
            timestamp: Some(event.timestamp()),
            delivery_mode: if self.durable {
                PERSISTENT_DELIVERY_MODE
            } else {
                TRANSIENT_DELIVERY_MODE
            },
            ..Default::default()
        };
        properties.headers.extend([
            (AGGREGATE_TYPE_HEADER.to_string(), event.aggregate_type().to_string()),
            (
                AGGREGATE_IDENTIFIER_HEADER.to_string(),
                event.aggregate_identifier().to_string(),
            ),
            (SEQUENCE_NUMBER_HEADER.to_string(), event.sequence_number().to_string()),
            (PAYLOAD_TYPE_HEADER.to_string(), event.payload_type().to_string()),
        ]);

        let mut message =
            BrokerMessage::new(body, self.routing_key_resolver.resolve_routing_key(event));
        message.properties = properties;
        Ok(message)
    }

    fn read_event_message(
        &self,
        message: &BrokerMessage,
    ) -> Result<DomainEventMessage, BrokerError> {
        Ok(self.serializer.deserialize(&message.body)?)
    }
}
