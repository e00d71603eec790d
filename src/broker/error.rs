//! Broker Errors

use std::time::Duration;

use crate::serializer::SerializationError;

/// Errors raised by a broker channel
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker channel is closed")]
    ChannelClosed,

    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Broker refused message: {0}")]
    PublishFailed(String),

    #[error("Broker transaction failed: {0}")]
    TransactionFailed(String),

    /// The broker negatively acknowledged published messages
    #[error("Broker rejected {unconfirmed} message(s)")]
    Nack { unconfirmed: usize },

    #[error("Timed out after {timeout:?} waiting for {unconfirmed} publisher confirm(s)")]
    AckTimeout {
        timeout: Duration,
        unconfirmed: usize,
    },

    #[error("Message conversion failed: {0}")]
    Conversion(#[from] SerializationError),

    /// Operation not allowed in the channel's current mode
    #[error("Invalid channel state: {0}")]
    InvalidState(String),
}

impl BrokerError {
    /// Check if the failure is transient and the publication may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionFailed(_)
                | BrokerError::ChannelClosed
                | BrokerError::AckTimeout { .. }
        )
    }
}
