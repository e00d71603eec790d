//! Event Bus Terminal module
//!
//! The terminal is the last stop of a published batch: local clusters first,
//! then a broker exchange. Broker-side reliability follows the configured
//! [`PublicationMode`] and the current unit of work.

mod broker_terminal;
mod cluster;
mod converter;
mod error;
mod listener;

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::DomainEventMessage;
use crate::unit_of_work::UnitOfWork;

pub use broker_terminal::{BrokerTerminal, PublicationMode, TerminalConfig, DEFAULT_EXCHANGE_NAME};
pub use cluster::{
    Cluster, ClusterMetaData, ConsumerConfiguration, EventListener, ListenerError, SimpleCluster,
    CONSUMER_CONFIG_PROPERTY,
};
pub use converter::{
    DefaultMessageConverter, MessageConverter, PayloadTypeRoutingKeyResolver, RoutingKeyResolver,
    AGGREGATE_IDENTIFIER_HEADER, AGGREGATE_TYPE_HEADER, PAYLOAD_TYPE_HEADER,
    SEQUENCE_NUMBER_HEADER,
};
pub use error::EventPublicationFailed;

/// Publishes event batches to their destinations
#[async_trait]
pub trait EventBusTerminal: Send + Sync {
    /// Publish the batch in order.
    ///
    /// With a unit of work the broker leg completes when the unit of work
    /// commits and is undone when it rolls back.
    async fn publish(
        &self,
        events: &[DomainEventMessage],
        unit_of_work: Option<&mut UnitOfWork>,
    ) -> Result<(), EventPublicationFailed>;

    /// Register a newly created cluster
    fn on_cluster_created(&self, cluster: Arc<dyn Cluster>);
}
