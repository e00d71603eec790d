//! Storage Medium Contract
//!
//! What the event store needs from the medium holding aggregate streams.

use async_trait::async_trait;

use crate::domain::DomainEventMessage;

use super::EventStoreError;

/// A medium holding one event stream, plus snapshots, per `(aggregate_type, identifier)`.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Whether a stream exists for the aggregate
    async fn event_stream_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError>;

    /// Open the aggregate's stream for appending, creating it if absent.
    ///
    /// The returned handle is an exclusive acquisition of the stream: other
    /// appends for the same aggregate wait until it is committed or dropped.
    async fn open_for_append(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Box<dyn AggregateStreamHandle>, EventStoreError>;

    /// Read every raw event of the stream in sequence order
    async fn read_event_stream(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Vec<DomainEventMessage>, EventStoreError>;

    /// Whether any snapshot exists for the aggregate
    async fn snapshot_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError>;

    /// Read the latest snapshot, if any.
    ///
    /// The latest snapshot is the one with the highest sequence number; among
    /// snapshots at the same position, the one written last.
    async fn read_latest_snapshot(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Option<DomainEventMessage>, EventStoreError>;

    /// Store a snapshot. Earlier snapshots are kept, including ones at the
    /// same sequence number.
    async fn write_snapshot(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError>;
}

/// Exclusive append target for one aggregate stream.
///
/// Writes are buffered and become visible to readers only on [`commit`].
/// Dropping the handle without committing discards them and releases the
/// acquisition.
///
/// [`commit`]: AggregateStreamHandle::commit
#[async_trait]
pub trait AggregateStreamHandle: Send {
    /// Whether the stream already existed when the handle was acquired
    fn stream_existed(&self) -> bool;

    /// Stage one message
    async fn write(&mut self, message: &DomainEventMessage) -> Result<(), EventStoreError>;

    /// Make every staged message visible at once and release the stream
    async fn commit(self: Box<Self>) -> Result<(), EventStoreError>;
}
