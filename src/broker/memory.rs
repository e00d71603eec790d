//! In-memory broker
//!
//! Records what reaches the exchange and lets callers script acks, refusals
//! and transaction failures.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{BrokerChannel, BrokerError, BrokerMessage, ChannelFactory};

/// How the broker answers `wait_for_confirms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckBehavior {
    #[default]
    Ack,
    Nack,
    /// Never confirm; waits until the timeout, or forever without one
    Never,
}

/// Scripted broker behaviour
#[derive(Debug, Clone, Default)]
pub struct BrokerBehavior {
    pub ack: AckBehavior,
    /// Zero-based index (across all channels) of the publish attempt to refuse
    pub fail_publish_at: Option<usize>,
    pub fail_tx_commit: bool,
    pub fail_open: bool,
}

/// A message that reached the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredMessage {
    pub exchange: String,
    pub message: BrokerMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    behavior: BrokerBehavior,
    delivered: Vec<DeliveredMessage>,
    publish_attempts: usize,
    sent: usize,
    commits: usize,
    rollbacks: usize,
    channels_opened: usize,
    channels_closed: usize,
}

/// Broker kept in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: BrokerBehavior) -> Self {
        let broker = Self::new();
        broker.set_behavior(behavior);
        broker
    }

    pub fn set_behavior(&self, behavior: BrokerBehavior) {
        self.state().behavior = behavior;
    }

    /// Messages delivered to exchanges, in order
    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.state().delivered.clone()
    }

    /// Messages accepted by a channel, delivered or not
    pub fn sent_count(&self) -> usize {
        self.state().sent
    }

    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    pub fn rollback_count(&self) -> usize {
        self.state().rollbacks
    }

    pub fn channels_opened(&self) -> usize {
        self.state().channels_opened
    }

    pub fn channels_closed(&self) -> usize {
        self.state().channels_closed
    }

    pub fn open_channel_count(&self) -> usize {
        let state = self.state();
        state.channels_opened - state.channels_closed
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ChannelFactory for InMemoryBroker {
    type Channel = InMemoryChannel;

    async fn open_channel(&self) -> Result<InMemoryChannel, BrokerError> {
        let mut state = self.state();
        if state.behavior.fail_open {
            return Err(BrokerError::ConnectionFailed(
                "in-memory broker refused connection".to_string(),
            ));
        }
        state.channels_opened += 1;

        Ok(InMemoryChannel {
            broker: self.clone(),
            open: true,
            transactional: false,
            confirms: false,
            pending: Vec::new(),
            unconfirmed: 0,
        })
    }
}

/// Channel on an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    open: bool,
    transactional: bool,
    confirms: bool,
    pending: Vec<DeliveredMessage>,
    unconfirmed: usize,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }

    fn ensure_transactional(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if !self.transactional {
            return Err(BrokerError::InvalidState(
                "channel is not transactional".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn basic_publish(
        &mut self,
        exchange: &str,
        message: BrokerMessage,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;

        let delivered = DeliveredMessage {
            exchange: exchange.to_string(),
            message,
        };

        let mut state = self.broker.state();
        let attempt = state.publish_attempts;
        state.publish_attempts += 1;
        if state.behavior.fail_publish_at == Some(attempt) {
            return Err(BrokerError::PublishFailed(format!(
                "publish attempt {} refused",
                attempt
            )));
        }
        state.sent += 1;

        if self.transactional {
            self.pending.push(delivered);
        } else {
            state.delivered.push(delivered);
        }
        if self.confirms {
            self.unconfirmed += 1;
        }
        Ok(())
    }

    async fn tx_select(&mut self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.confirms {
            return Err(BrokerError::InvalidState(
                "channel in confirm mode cannot be transactional".to_string(),
            ));
        }
        self.transactional = true;
        Ok(())
    }

    async fn tx_commit(&mut self) -> Result<(), BrokerError> {
        self.ensure_transactional()?;

        let mut state = self.broker.state();
        if state.behavior.fail_tx_commit {
            return Err(BrokerError::TransactionFailed(
                "in-memory broker refused commit".to_string(),
            ));
        }
        state.delivered.append(&mut self.pending);
        state.commits += 1;
        Ok(())
    }

    async fn tx_rollback(&mut self) -> Result<(), BrokerError> {
        self.ensure_transactional()?;

        self.pending.clear();
        self.broker.state().rollbacks += 1;
        Ok(())
    }

    async fn confirm_select(&mut self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.transactional {
            return Err(BrokerError::InvalidState(
                "transactional channel cannot enter confirm mode".to_string(),
            ));
        }
        self.confirms = true;
        Ok(())
    }

    async fn wait_for_confirms(&mut self, timeout: Option<Duration>) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if !self.confirms {
            return Err(BrokerError::InvalidState(
                "channel is not in confirm mode".to_string(),
            ));
        }
        if self.unconfirmed == 0 {
            return Ok(());
        }

        let ack = self.broker.state().behavior.ack;
        let unconfirmed = self.unconfirmed;
        match ack {
            AckBehavior::Ack => {
                self.unconfirmed = 0;
                Ok(())
            }
            AckBehavior::Nack => {
                self.unconfirmed = 0;
                Err(BrokerError::Nack { unconfirmed })
            }
            AckBehavior::Never => match timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    Err(BrokerError::AckTimeout {
                        timeout,
                        unconfirmed,
                    })
                }
                None => std::future::pending().await,
            },
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.ensure_open()?;

        // Unconfirmed transactional sends die with the channel
        self.pending.clear();
        self.open = false;
        self.broker.state().channels_closed += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
