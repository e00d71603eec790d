//! Event Meta Data
//!
//! Contains metadata attached to an event message for auditing and tracing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Key under which the correlation ID is stored
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Key under which the causation ID is stored
pub const CAUSATION_ID_KEY: &str = "causation_id";

/// Metadata of an event message, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaData(HashMap<String, serde_json::Value>);

impl MetaData {
    /// Create new empty metadata
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Add an entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Create metadata with correlation ID
    pub fn with_correlation_id(self, correlation_id: Uuid) -> Self {
        self.with(CORRELATION_ID_KEY, correlation_id.to_string())
    }

    /// Create metadata with causation ID
    pub fn with_causation_id(self, causation_id: Uuid) -> Self {
        self.with(CAUSATION_ID_KEY, causation_id.to_string())
    }

    /// Merge another set of entries into this one, the other side wins on conflicts
    pub fn merged_with(mut self, other: &MetaData) -> Self {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Correlation ID, if present and well-formed
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.uuid_entry(CORRELATION_ID_KEY)
    }

    /// Causation ID, if present and well-formed
    pub fn causation_id(&self) -> Option<Uuid> {
        self.uuid_entry(CAUSATION_ID_KEY)
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        if let Some(id) = self.correlation_id() {
            return id;
        }
        let id = Uuid::new_v4();
        self.0
            .insert(CORRELATION_ID_KEY.to_string(), id.to_string().into());
        id
    }

    fn uuid_entry(&self, key: &str) -> Option<Uuid> {
        self.0
            .get(key)
            .and_then(|value| value.as_str())
            .and_then(|value| value.parse().ok())
    }
}

impl FromIterator<(String, serde_json::Value)> for MetaData {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
