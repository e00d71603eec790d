//! Broker terminal
//!
//! Publishes event batches to local clusters and then to a broker exchange,
//! tying the broker channel's fate to the current unit of work if there is one.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{BrokerChannel, BrokerError, ChannelFactory};
use crate::domain::DomainEventMessage;
use crate::serializer::JsonSerializer;
use crate::unit_of_work::UnitOfWork;

use super::listener::{complete_publication, try_close, try_rollback, ChannelTransactionListener};
use super::{
    Cluster, ConsumerConfiguration, DefaultMessageConverter, EventBusTerminal,
    EventPublicationFailed, MessageConverter, CONSUMER_CONFIG_PROPERTY,
};

pub const DEFAULT_EXCHANGE_NAME: &str = "EventBus";

/// How the broker leg of a publication is made reliable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicationMode {
    /// Fire and forget
    #[default]
    Immediate,
    /// Broker transaction, committed with the unit of work
    Transactional,
    /// Publisher confirms, awaited with the unit of work
    AckWait,
}

/// Terminal settings
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub exchange_name: String,
    pub mode: PublicationMode,
    /// Zero waits indefinitely
    pub publisher_ack_timeout: Duration,
    pub durable: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            exchange_name: DEFAULT_EXCHANGE_NAME.to_string(),
            mode: PublicationMode::Immediate,
            publisher_ack_timeout: Duration::ZERO,
            durable: true,
        }
    }
}

impl TerminalConfig {
    fn ack_timeout(&self) -> Option<Duration> {
        if self.publisher_ack_timeout.is_zero() {
            None
        } else {
            Some(self.publisher_ack_timeout)
        }
    }
}

struct RegisteredCluster {
    cluster: Arc<dyn Cluster>,
    consumer: ConsumerConfiguration,
}

/// Terminal publishing to clusters and a broker exchange
pub struct BrokerTerminal<F> {
    factory: F,
    converter: Arc<dyn MessageConverter>,
    config: TerminalConfig,
    clusters: RwLock<Vec<RegisteredCluster>>,
}

impl<F: ChannelFactory> BrokerTerminal<F> {
    /// Terminal with JSON bodies and payload-namespace routing
    pub fn new(factory: F, config: TerminalConfig) -> Self {
        let converter = DefaultMessageConverter::new(Arc::new(JsonSerializer::new()))
            .with_durable(config.durable);
        Self::with_converter(factory, Arc::new(converter), config)
    }

    pub fn with_converter(
        factory: F,
        converter: Arc<dyn MessageConverter>,
        config: TerminalConfig,
    ) -> Self {
        Self {
            factory,
            converter,
            config,
            clusters: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Consumer configuration resolved for a registered cluster
    pub fn consumer_configuration(&self, cluster_name: &str) -> Option<ConsumerConfiguration> {
        self.clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|registered| registered.cluster.name() == cluster_name)
            .map(|registered| registered.consumer.clone())
    }

    async fn dispatch_to_clusters(&self, events: &[DomainEventMessage]) {
        let clusters: Vec<Arc<dyn Cluster>> = self
            .clusters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|registered| registered.cluster.clone())
            .collect();

        for cluster in clusters {
            if let Err(e) = cluster.publish(events).await {
                tracing::error!(
                    cluster = %cluster.name(),
                    event_count = events.len(),
                    error = %e,
                    "Cluster failed to handle events"
                );
            }
        }
    }

    async fn send(
        &self,
        channel: &mut F::Channel,
        events: &[DomainEventMessage],
    ) -> Result<(), BrokerError> {
        match self.config.mode {
            PublicationMode::Transactional => channel.tx_select().await?,
            PublicationMode::AckWait => channel.confirm_select().await?,
            PublicationMode::Immediate => {}
        }

        for event in events {
            let message = self.converter.create_broker_message(event)?;
            channel
                .basic_publish(&self.config.exchange_name, message)
                .await?;
        }
        Ok(())
    }
}

fn resolve_consumer_configuration(cluster: &dyn Cluster) -> ConsumerConfiguration {
    match cluster.meta_data().property(CONSUMER_CONFIG_PROPERTY) {
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    cluster = %cluster.name(),
                    error = %e,
                    "Malformed consumer configuration, using default"
                );
                ConsumerConfiguration::for_cluster(cluster.name())
            }
        },
        None => ConsumerConfiguration::for_cluster(cluster.name()),
    }
}

#[async_trait]
impl<F: ChannelFactory> EventBusTerminal for BrokerTerminal<F> {
    async fn publish(
        &self,
        events: &[DomainEventMessage],
        unit_of_work: Option<&mut UnitOfWork>,
    ) -> Result<(), EventPublicationFailed> {
        if events.is_empty() {
            return Ok(());
        }

        self.dispatch_to_clusters(events).await;

        let mut channel = self
            .factory
            .open_channel()
            .await
            .map_err(|e| EventPublicationFailed::new("Unable to open broker channel", e))?;

        let unit_of_work = unit_of_work.filter(|uow| uow.accepts_listeners());
        let mode = self.config.mode;

        let mut result = self.send(&mut channel, events).await;
        if result.is_ok() && unit_of_work.is_none() {
            result = complete_publication(&mut channel, mode, self.config.ack_timeout()).await;
        }

        match (result, unit_of_work) {
            (Ok(()), Some(uow)) => {
                uow.register_listener(ChannelTransactionListener::new(
                    channel,
                    mode,
                    self.config.ack_timeout(),
                ))
                .map_err(|e| {
                    EventPublicationFailed::new(
                        "Unable to attach broker channel to unit of work",
                        BrokerError::InvalidState(e.to_string()),
                    )
                })?;

                tracing::debug!(
                    unit_of_work = %uow.id(),
                    event_count = events.len(),
                    "Events sent, broker leg deferred to unit of work"
                );
                Ok(())
            }
            (Ok(()), None) => {
                try_close(&mut channel).await;

                tracing::info!(
                    exchange = %self.config.exchange_name,
                    event_count = events.len(),
                    mode = ?mode,
                    "Published events to broker"
                );
                Ok(())
            }
            (Err(e), unit_of_work) => {
                if mode == PublicationMode::Transactional {
                    try_rollback(&mut channel).await;
                }

                // Inside a unit of work the channel outlives this call; the listener closes it
                match unit_of_work {
                    Some(uow) => {
                        if let Err(e) =
                            uow.register_listener(ChannelTransactionListener::close_only(channel))
                        {
                            tracing::info!(error = %e, "Unable to defer broker channel close");
                        }
                    }
                    None => try_close(&mut channel).await,
                }

                tracing::warn!(
                    exchange = %self.config.exchange_name,
                    event_count = events.len(),
                    error = %e,
                    "Publication to broker failed"
                );
                Err(EventPublicationFailed::new(
                    "Failed to publish events to broker",
                    e,
                ))
            }
        }
    }

    fn on_cluster_created(&self, cluster: Arc<dyn Cluster>) {
        let consumer = resolve_consumer_configuration(cluster.as_ref());

        tracing::info!(
            cluster = %cluster.name(),
            queue = %consumer.queue_name,
            "Cluster registered with terminal"
        );

        self.clusters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RegisteredCluster { cluster, consumer });
    }
}
