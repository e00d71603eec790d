//! Serializer
//!
//! Turns event messages into bytes for storage media and broker message bodies.

use crate::domain::DomainEventMessage;

/// Serialization errors
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// JSON encoding or decoding failed
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Converts event messages to and from bytes
pub trait Serializer: Send + Sync {
    /// Serialize a complete event message
    fn serialize(&self, message: &DomainEventMessage) -> Result<Vec<u8>, SerializationError>;

    /// Deserialize bytes produced by [`Serializer::serialize`]
    fn deserialize(&self, bytes: &[u8]) -> Result<DomainEventMessage, SerializationError>;

    /// MIME type of the serialized form
    fn content_type(&self) -> &'static str;
}

/// JSON serializer backed by serde_json
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, message: &DomainEventMessage) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(message)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<DomainEventMessage, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetaData;

    #[test]
    fn test_json_serializer_preserves_message() {
        let message = DomainEventMessage::new(
            "Order",
            "A1",
            2,
            "orders.OrderShipped",
            serde_json::json!({ "carrier": "dhl" }),
        )
        .with_meta_data(MetaData::new().with("user", "alice"));

        let serializer = JsonSerializer::new();
        let bytes = serializer.serialize(&message).unwrap();
        let restored = serializer.deserialize(&bytes).unwrap();

        assert_eq!(restored, message);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result = JsonSerializer.deserialize(b"not json");
        assert!(matches!(result, Err(SerializationError::Json(_))));
    }
}
