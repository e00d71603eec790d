//! Publication Errors

use crate::broker::BrokerError;

/// Publication of events to the broker failed.
///
/// Always carries the broker failure that caused it.
#[derive(Debug, thiserror::Error)]
#[error("{message}: {cause}")]
pub struct EventPublicationFailed {
    message: String,
    #[source]
    cause: BrokerError,
}

impl EventPublicationFailed {
    pub fn new(message: impl Into<String>, cause: BrokerError) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> &BrokerError {
        &self.cause
    }

    pub fn into_cause(self) -> BrokerError {
        self.cause
    }

    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}
