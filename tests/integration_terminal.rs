//! Integration tests for the broker terminal

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use event_core::broker::{AckBehavior, BrokerBehavior, BrokerError, InMemoryBroker};
use event_core::terminal::{
    BrokerTerminal, Cluster, ClusterMetaData, ConsumerConfiguration, EventBusTerminal,
    EventListener, ListenerError, PublicationMode, SimpleCluster, TerminalConfig,
};
use event_core::{DomainEventMessage, UnitOfWork};
use tokio_test::{assert_err, assert_ok};

mod common;

use common::order_events;

fn terminal(mode: PublicationMode, behavior: BrokerBehavior) -> (InMemoryBroker, BrokerTerminal<InMemoryBroker>) {
    terminal_with_timeout(mode, behavior, Duration::ZERO)
}

fn terminal_with_timeout(
    mode: PublicationMode,
    behavior: BrokerBehavior,
    publisher_ack_timeout: Duration,
) -> (InMemoryBroker, BrokerTerminal<InMemoryBroker>) {
    let broker = InMemoryBroker::with_behavior(behavior);
    let config = TerminalConfig {
        mode,
        publisher_ack_timeout,
        ..Default::default()
    };
    (broker.clone(), BrokerTerminal::new(broker, config))
}

fn silent_broker() -> BrokerBehavior {
    BrokerBehavior {
        ack: AckBehavior::Never,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_transactional_publish_without_unit_of_work() {
    let (broker, terminal) = terminal(PublicationMode::Transactional, BrokerBehavior::default());

    assert_ok!(terminal.publish(&order_events("A1", 0..3), None).await);

    assert_eq!(broker.commit_count(), 1);
    assert_eq!(broker.channels_opened(), 1);
    assert_eq!(broker.channels_closed(), 1);

    let delivered = broker.delivered();
    assert_eq!(delivered.len(), 3);
    assert!(delivered.iter().all(|d| d.exchange == "EventBus"));
    assert!(delivered.iter().all(|d| d.message.routing_key == "shop.orders"));
    assert!(delivered.iter().all(|d| d.message.is_durable()));
}

#[tokio::test]
async fn test_transactional_failure_rolls_back_and_closes() {
    let (broker, terminal) = terminal(
        PublicationMode::Transactional,
        BrokerBehavior {
            fail_publish_at: Some(1),
            ..Default::default()
        },
    );

    let err = assert_err!(terminal.publish(&order_events("A1", 0..3), None).await);

    assert!(matches!(err.cause(), BrokerError::PublishFailed(_)));
    assert_eq!(broker.sent_count(), 1);
    assert!(broker.delivered().is_empty());
    assert_eq!(broker.rollback_count(), 1);
    assert_eq!(broker.commit_count(), 0);
    assert_eq!(broker.open_channel_count(), 0);
}

#[tokio::test]
async fn test_immediate_publish_delivers_in_order() {
    let (broker, terminal) = terminal(PublicationMode::Immediate, BrokerBehavior::default());
    let events = order_events("A1", 0..4);

    terminal.publish(&events, None).await.unwrap();

    let ids: Vec<String> = broker
        .delivered()
        .into_iter()
        .filter_map(|d| d.message.properties.message_id)
        .collect();
    let expected: Vec<String> = events.iter().map(|e| e.identifier().to_string()).collect();
    assert_eq!(ids, expected);
    assert_eq!(broker.commit_count(), 0);
}

#[tokio::test]
async fn test_empty_batch_opens_no_channel() {
    let (broker, terminal) = terminal(PublicationMode::Transactional, BrokerBehavior::default());

    terminal.publish(&[], None).await.unwrap();

    assert_eq!(broker.channels_opened(), 0);
}

#[tokio::test]
async fn test_ack_wait_confirmed() {
    let (broker, terminal) = terminal(PublicationMode::AckWait, BrokerBehavior::default());

    terminal.publish(&order_events("A1", 0..2), None).await.unwrap();

    assert_eq!(broker.delivered().len(), 2);
    assert_eq!(broker.open_channel_count(), 0);
}

#[tokio::test]
async fn test_ack_wait_nack_fails() {
    let (broker, terminal) = terminal(
        PublicationMode::AckWait,
        BrokerBehavior {
            ack: AckBehavior::Nack,
            ..Default::default()
        },
    );

    let err = terminal
        .publish(&order_events("A1", 0..2), None)
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), BrokerError::Nack { unconfirmed: 2 }));
    assert_eq!(broker.open_channel_count(), 0);
}

#[tokio::test]
async fn test_ack_wait_times_out() {
    let timeout = Duration::from_millis(50);
    let (broker, terminal) =
        terminal_with_timeout(PublicationMode::AckWait, silent_broker(), timeout);

    let started = Instant::now();
    let err = terminal
        .publish(&order_events("A1", 0..1), None)
        .await
        .unwrap_err();

    assert!(started.elapsed() >= timeout);
    assert!(matches!(err.cause(), BrokerError::AckTimeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(broker.open_channel_count(), 0);
}

#[tokio::test]
async fn test_ack_wait_without_timeout_blocks() {
    let (_broker, terminal) = terminal(PublicationMode::AckWait, silent_broker());
    let events = order_events("A1", 0..1);

    let outcome =
        tokio::time::timeout(Duration::from_millis(100), terminal.publish(&events, None)).await;

    assert!(outcome.is_err(), "publication should still be waiting for confirms");
}

#[tokio::test]
async fn test_unreachable_broker() {
    let (_broker, terminal) = terminal(
        PublicationMode::Immediate,
        BrokerBehavior {
            fail_open: true,
            ..Default::default()
        },
    );

    let err = terminal
        .publish(&order_events("A1", 0..1), None)
        .await
        .unwrap_err();

    assert!(matches!(err.cause(), BrokerError::ConnectionFailed(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unit_of_work_defers_broker_commit() {
    let (broker, terminal) = terminal(PublicationMode::Transactional, BrokerBehavior::default());
    let mut uow = UnitOfWork::new();
    uow.start().unwrap();

    terminal
        .publish(&order_events("A1", 0..2), Some(&mut uow))
        .await
        .unwrap();

    assert!(broker.delivered().is_empty());
    assert_eq!(broker.open_channel_count(), 1);

    uow.commit().await.unwrap();

    assert_eq!(broker.delivered().len(), 2);
    assert_eq!(broker.commit_count(), 1);
    assert_eq!(broker.open_channel_count(), 0);
}

#[tokio::test]
async fn test_unit_of_work_rollback_discards_broker_leg() {
    let (broker, terminal) = terminal(PublicationMode::Transactional, BrokerBehavior::default());
    let mut uow = UnitOfWork::new();
    uow.start().unwrap();

    terminal
        .publish(&order_events("A1", 0..2), Some(&mut uow))
        .await
        .unwrap();
    uow.rollback(None).await;

    assert!(broker.delivered().is_empty());
    assert_eq!(broker.rollback_count(), 1);
    assert_eq!(broker.open_channel_count(), 0);
}

#[tokio::test]
async fn test_failure_inside_unit_of_work_defers_close() {
    let (broker, terminal) = terminal(
        PublicationMode::Transactional,
        BrokerBehavior {
            fail_publish_at: Some(0),
            ..Default::default()
        },
    );
    let mut uow = UnitOfWork::new();
    uow.start().unwrap();

    assert_err!(terminal.publish(&order_events("A1", 0..1), Some(&mut uow)).await);

    assert_eq!(broker.rollback_count(), 1);
    assert_eq!(broker.open_channel_count(), 1);

    uow.rollback(None).await;
    assert_eq!(broker.open_channel_count(), 0);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<i64>>,
}

#[async_trait]
impl EventListener for Recorder {
    async fn handle(&self, event: &DomainEventMessage) -> Result<(), ListenerError> {
        self.seen.lock().unwrap().push(event.sequence_number());
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl EventListener for Failing {
    async fn handle(&self, _event: &DomainEventMessage) -> Result<(), ListenerError> {
        Err("projection store offline".into())
    }
}

#[tokio::test]
async fn test_clusters_receive_batch_and_failures_are_isolated() {
    let (broker, terminal) = terminal(PublicationMode::Immediate, BrokerBehavior::default());

    let broken = Arc::new(SimpleCluster::new("broken"));
    broken.subscribe(Arc::new(Failing));
    let recorder = Arc::new(Recorder::default());
    let healthy = Arc::new(SimpleCluster::new("projections"));
    healthy.subscribe(recorder.clone());

    terminal.on_cluster_created(broken);
    terminal.on_cluster_created(healthy);
    assert_eq!(terminal.cluster_count(), 2);

    terminal
        .publish(&order_events("A1", 0..3), None)
        .await
        .unwrap();

    assert_eq!(*recorder.seen.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(broker.delivered().len(), 3);
}

#[tokio::test]
async fn test_cluster_consumer_configuration() {
    let (_broker, terminal) = terminal(PublicationMode::Immediate, BrokerBehavior::default());

    let explicit = ConsumerConfiguration {
        queue_name: "orders-projections".to_string(),
        exclusive: false,
        prefetch_count: 25,
    };
    let meta_data = ClusterMetaData::new()
        .with_consumer_configuration(&explicit)
        .unwrap();
    let configured: Arc<dyn Cluster> =
        Arc::new(SimpleCluster::with_meta_data("configured", meta_data));
    terminal.on_cluster_created(configured);
    terminal.on_cluster_created(Arc::new(SimpleCluster::new("plain")));

    assert_eq!(terminal.consumer_configuration("configured"), Some(explicit));
    assert_eq!(
        terminal.consumer_configuration("plain"),
        Some(ConsumerConfiguration::for_cluster("plain"))
    );
    assert_eq!(terminal.consumer_configuration("unknown"), None);
}
