//! In-memory storage medium
//!
//! Keeps streams and snapshots in process memory. Useful for tests and for
//! short-lived processes that do not need durability.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::DomainEventMessage;

use super::locks::{StreamGuard, StreamLocks};
use super::{AggregateStreamHandle, EventStorage, EventStoreError};

type StreamKey = (String, String);

#[derive(Debug, Default)]
struct Streams {
    events: HashMap<StreamKey, Vec<DomainEventMessage>>,
    snapshots: HashMap<StreamKey, Vec<DomainEventMessage>>,
}

/// Event storage held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    streams: Arc<RwLock<Streams>>,
    locks: Arc<StreamLocks>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of aggregates with a stream
    pub fn stream_count(&self) -> usize {
        self.read(|streams| streams.events.len())
    }

    /// Number of snapshots kept for an aggregate, superseded ones included
    pub fn snapshot_count(&self, aggregate_type: &str, identifier: &str) -> usize {
        self.read(|streams| {
            streams
                .snapshots
                .get(&key(aggregate_type, identifier))
                .map_or(0, Vec::len)
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Streams) -> T) -> T {
        let streams = self.streams.read().unwrap_or_else(PoisonError::into_inner);
        f(&streams)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Streams) -> T) -> T {
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut streams)
    }
}

fn key(aggregate_type: &str, identifier: &str) -> StreamKey {
    (aggregate_type.to_string(), identifier.to_string())
}

#[async_trait]
impl EventStorage for InMemoryStorage {
    async fn event_stream_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError> {
        Ok(self.read(|streams| streams.events.contains_key(&key(aggregate_type, identifier))))
    }

    async fn open_for_append(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Box<dyn AggregateStreamHandle>, EventStoreError> {
        let guard = self.locks.acquire(aggregate_type, identifier).await;
        let key = key(aggregate_type, identifier);
        let existed = self.read(|streams| streams.events.contains_key(&key));

        Ok(Box::new(InMemoryStreamHandle {
            key,
            storage: self.clone(),
            staged: Vec::new(),
            existed,
            _guard: guard,
        }))
    }

    async fn read_event_stream(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Vec<DomainEventMessage>, EventStoreError> {
        self.read(|streams| streams.events.get(&key(aggregate_type, identifier)).cloned())
            .ok_or_else(|| EventStoreError::stream_not_found(aggregate_type, identifier))
    }

    async fn snapshot_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError> {
        Ok(self.snapshot_count(aggregate_type, identifier) > 0)
    }

    async fn read_latest_snapshot(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Option<DomainEventMessage>, EventStoreError> {
        Ok(self.read(|streams| {
            streams
                .snapshots
                .get(&key(aggregate_type, identifier))
                .and_then(|snapshots| {
                    snapshots
                        .iter()
                        .max_by_key(|snapshot| snapshot.sequence_number())
                        .cloned()
                })
        }))
    }

    async fn write_snapshot(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError> {
        let key = key(aggregate_type, snapshot.aggregate_identifier());
        self.write(|streams| {
            streams
                .snapshots
                .entry(key)
                .or_default()
                .push(snapshot.clone())
        });
        Ok(())
    }
}

struct InMemoryStreamHandle {
    key: StreamKey,
    storage: InMemoryStorage,
    staged: Vec<DomainEventMessage>,
    existed: bool,
    _guard: StreamGuard,
}

#[async_trait]
impl AggregateStreamHandle for InMemoryStreamHandle {
    fn stream_existed(&self) -> bool {
        self.existed
    }

    async fn write(&mut self, message: &DomainEventMessage) -> Result<(), EventStoreError> {
        self.staged.push(message.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), EventStoreError> {
        let InMemoryStreamHandle {
            key,
            storage,
            staged,
            ..
        } = *self;
        storage.write(|streams| streams.events.entry(key).or_default().extend(staged));
        Ok(())
    }
}
