//! Domain Event Messages
//!
//! Immutable records of something that happened to an aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MetaData;

/// An event raised by an aggregate, positioned in its stream by `sequence_number`.
///
/// Sequence numbers start at 0 for every aggregate and act as the optimistic
/// concurrency token. The payload is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEventMessage {
    identifier: Uuid,
    aggregate_type: String,
    aggregate_identifier: String,
    sequence_number: i64,
    payload_type: String,
    payload: serde_json::Value,
    meta_data: MetaData,
    timestamp: DateTime<Utc>,
}

impl DomainEventMessage {
    /// Create a new event message with a fresh identifier and the current time
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_identifier: impl Into<String>,
        sequence_number: i64,
        payload_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_identifier: aggregate_identifier.into(),
            sequence_number,
            payload_type: payload_type.into(),
            payload,
            meta_data: MetaData::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new event message from any serializable payload
    pub fn from_payload<P: Serialize>(
        aggregate_type: &str,
        aggregate_identifier: &str,
        sequence_number: i64,
        payload_type: &str,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(payload)?;
        Ok(Self::new(
            aggregate_type,
            aggregate_identifier,
            sequence_number,
            payload_type,
            payload,
        ))
    }

    /// Rebuild a message from stored parts
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        identifier: Uuid,
        aggregate_type: String,
        aggregate_identifier: String,
        sequence_number: i64,
        payload_type: String,
        payload: serde_json::Value,
        meta_data: MetaData,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            aggregate_type,
            aggregate_identifier,
            sequence_number,
            payload_type,
            payload,
            meta_data,
            timestamp,
        }
    }

    /// Returns a copy of this message with its metadata replaced
    pub fn with_meta_data(mut self, meta_data: MetaData) -> Self {
        self.meta_data = meta_data;
        self
    }

    /// Returns a copy of this message with extra metadata entries merged in
    pub fn and_meta_data(mut self, meta_data: &MetaData) -> Self {
        self.meta_data = self.meta_data.merged_with(meta_data);
        self
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_identifier(&self) -> &str {
        &self.aggregate_identifier
    }

    pub fn sequence_number(&self) -> i64 {
        self.sequence_number
    }

    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn meta_data(&self) -> &MetaData {
        &self.meta_data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
