//! Clusters
//!
//! In-process groups of event listeners that receive every published batch
//! before it goes to the broker.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::DomainEventMessage;

/// Cluster metadata property holding the broker consumer configuration
pub const CONSUMER_CONFIG_PROPERTY: &str = "broker.consumer-config";

/// Failure raised by a listener or cluster
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// How a cluster consumes from the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfiguration {
    pub queue_name: String,
    #[serde(default = "default_exclusive")]
    pub exclusive: bool,
    #[serde(default)]
    pub prefetch_count: u16,
}

fn default_exclusive() -> bool {
    true
}

impl ConsumerConfiguration {
    /// Default configuration: an exclusive queue named after the cluster
    pub fn for_cluster(cluster_name: &str) -> Self {
        Self {
            queue_name: cluster_name.to_string(),
            exclusive: true,
            prefetch_count: 0,
        }
    }
}

/// Free-form cluster properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterMetaData(HashMap<String, serde_json::Value>);

impl ClusterMetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_property_set(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Metadata carrying an explicit consumer configuration
    pub fn with_consumer_configuration(
        mut self,
        config: &ConsumerConfiguration,
    ) -> Result<Self, serde_json::Error> {
        self.set_property(CONSUMER_CONFIG_PROPERTY, serde_json::to_value(config)?);
        Ok(self)
    }
}

/// Handles events dispatched by a cluster
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn handle(&self, event: &DomainEventMessage) -> Result<(), ListenerError>;
}

/// A group of listeners reached by local dispatch
#[async_trait]
pub trait Cluster: Send + Sync {
    fn name(&self) -> &str;

    fn meta_data(&self) -> &ClusterMetaData;

    /// Deliver the batch to every member, in order
    async fn publish(&self, events: &[DomainEventMessage]) -> Result<(), ListenerError>;
}

/// Cluster that hands each event to its listeners one after another
pub struct SimpleCluster {
    name: String,
    meta_data: ClusterMetaData,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl SimpleCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_meta_data(name, ClusterMetaData::new())
    }

    pub fn with_meta_data(name: impl Into<String>, meta_data: ClusterMetaData) -> Self {
        Self {
            name: name.into(),
            meta_data,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for SimpleCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleCluster")
            .field("name", &self.name)
            .field("meta_data", &self.meta_data)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[async_trait]
impl Cluster for SimpleCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn meta_data(&self) -> &ClusterMetaData {
        &self.meta_data
    }

    async fn publish(&self, events: &[DomainEventMessage]) -> Result<(), ListenerError> {
        let listeners: Vec<Arc<dyn EventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for event in events {
            for listener in &listeners {
                listener.handle(event).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collector(Mutex<Vec<i64>>);

    #[async_trait]
    impl EventListener for Collector {
        async fn handle(&self, event: &DomainEventMessage) -> Result<(), ListenerError> {
            self.0.lock().unwrap().push(event.sequence_number());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cluster_delivers_in_order() {
        let collector = Arc::new(Collector::default());
        let cluster = SimpleCluster::new("projections");
        cluster.subscribe(collector.clone());

        let events: Vec<DomainEventMessage> = (0..3)
            .map(|seq| {
                DomainEventMessage::new("Order", "A1", seq, "orders.Created", serde_json::Value::Null)
            })
            .collect();
        cluster.publish(&events).await.unwrap();

        assert_eq!(*collector.0.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_consumer_configuration_in_meta_data() {
        let config = ConsumerConfiguration {
            queue_name: "orders-queue".to_string(),
            exclusive: false,
            prefetch_count: 10,
        };
        let meta_data = ClusterMetaData::new()
            .with_consumer_configuration(&config)
            .unwrap();

        assert!(meta_data.is_property_set(CONSUMER_CONFIG_PROPERTY));
        let value = meta_data.property(CONSUMER_CONFIG_PROPERTY).unwrap().clone();
        let parsed: ConsumerConfiguration = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_consumer_configuration_defaults() {
        let parsed: ConsumerConfiguration =
            serde_json::from_value(serde_json::json!({ "queue_name": "q" })).unwrap();
        assert!(parsed.exclusive);
        assert_eq!(parsed.prefetch_count, 0);
    }
}
