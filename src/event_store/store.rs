//! Event Store
//!
//! Append and read aggregate event streams on top of a storage medium, with
//! optimistic concurrency on stream creation and snapshot fast-path reads.
//!
//! Only the creation of a stream (first event at sequence 0) is guarded
//! here, and a stream can only be created at sequence 0. Appends at higher
//! sequence numbers are expected to be serialized by the caller, typically
//! one unit of work per aggregate at a time; this store does not detect lost
//! updates between them.

use crate::domain::{DomainEventMessage, DomainEventStream};

use super::{EventStorage, EventStoreError};

/// Event Store for persisting and retrieving events
#[derive(Debug, Clone)]
pub struct EventStore<S> {
    storage: S,
}

impl<S: EventStorage> EventStore<S> {
    /// Create a new EventStore over a storage medium
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Append a batch of events for one aggregate.
    ///
    /// The batch is written completely or not at all. An empty stream is a
    /// no-op.
    pub async fn append_events(
        &self,
        aggregate_type: &str,
        mut events: DomainEventStream,
    ) -> Result<(), EventStoreError> {
        let (identifier, first_sequence) = match events.peek() {
            Some(first) => (
                first.aggregate_identifier().to_string(),
                first.sequence_number(),
            ),
            None => {
                tracing::debug!(aggregate_type = %aggregate_type, "Nothing to append");
                return Ok(());
            }
        };

        if first_sequence < 0 {
            return Err(EventStoreError::InvalidEventStream(format!(
                "Negative sequence number {} for aggregate {}",
                first_sequence, identifier
            )));
        }

        let creates_stream = first_sequence == 0;
        let mut handle = self.storage.open_for_append(aggregate_type, &identifier).await?;

        if creates_stream && handle.stream_existed() {
            return Err(EventStoreError::conflicting_modification(aggregate_type, &identifier));
        }
        if !creates_stream && !handle.stream_existed() {
            return Err(EventStoreError::InvalidEventStream(format!(
                "New stream for aggregate {} must start at sequence 0, got {}",
                identifier, first_sequence
            )));
        }

        let mut expected_sequence = first_sequence;
        for message in events {
            check_position(&message, &identifier, expected_sequence)?;
            handle.write(&message).await?;
            expected_sequence += 1;
        }

        handle.commit().await?;

        tracing::info!(
            aggregate_type = %aggregate_type,
            aggregate_identifier = %identifier,
            first_sequence = first_sequence,
            event_count = expected_sequence - first_sequence,
            "Appended events to event store"
        );

        Ok(())
    }

    /// Store a snapshot of an existing aggregate.
    ///
    /// The snapshot may not claim a position past the last stored event. Raw
    /// events are never deleted; the snapshot only shortens later reads.
    pub async fn append_snapshot_event(
        &self,
        aggregate_type: &str,
        snapshot_event: &DomainEventMessage,
    ) -> Result<(), EventStoreError> {
        let identifier = snapshot_event.aggregate_identifier();
        let last_sequence = self
            .storage
            .read_event_stream(aggregate_type, identifier)
            .await?
            .last()
            .map(DomainEventMessage::sequence_number)
            .ok_or_else(|| EventStoreError::stream_not_found(aggregate_type, identifier))?;

        if snapshot_event.sequence_number() > last_sequence {
            return Err(EventStoreError::InvalidEventStream(format!(
                "Snapshot of aggregate {} at sequence {} is ahead of the stream, which ends at {}",
                identifier,
                snapshot_event.sequence_number(),
                last_sequence
            )));
        }

        self.storage
            .write_snapshot(aggregate_type, snapshot_event)
            .await?;

        tracing::info!(
            aggregate_type = %aggregate_type,
            aggregate_identifier = %identifier,
            sequence_number = snapshot_event.sequence_number(),
            "Snapshot saved"
        );

        Ok(())
    }

    /// Read the aggregate's events, starting at the latest snapshot if there is one.
    ///
    /// Snapshot lookup failures are logged and fall back to a full replay.
    pub async fn read_events(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<DomainEventStream, EventStoreError> {
        if !self
            .storage
            .event_stream_exists(aggregate_type, identifier)
            .await?
        {
            return Err(EventStoreError::stream_not_found(aggregate_type, identifier));
        }

        let snapshot = match self.read_snapshot_event(aggregate_type, identifier).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    aggregate_type = %aggregate_type,
                    aggregate_identifier = %identifier,
                    error = %e,
                    "Snapshot lookup failed, replaying full stream"
                );
                None
            }
        };

        let events = self
            .storage
            .read_event_stream(aggregate_type, identifier)
            .await?;

        let events = match snapshot {
            Some(snapshot) => {
                let snapshot_sequence = snapshot.sequence_number();
                std::iter::once(snapshot)
                    .chain(
                        events
                            .into_iter()
                            .filter(|e| e.sequence_number() > snapshot_sequence),
                    )
                    .collect()
            }
            None => events,
        };

        tracing::debug!(
            aggregate_type = %aggregate_type,
            aggregate_identifier = %identifier,
            event_count = events.len(),
            "Loaded event stream"
        );

        Ok(DomainEventStream::new(events))
    }

    async fn read_snapshot_event(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Option<DomainEventMessage>, EventStoreError> {
        if !self.storage.snapshot_exists(aggregate_type, identifier).await? {
            return Ok(None);
        }
        self.storage
            .read_latest_snapshot(aggregate_type, identifier)
            .await
    }
}

fn check_position(
    message: &DomainEventMessage,
    identifier: &str,
    expected_sequence: i64,
) -> Result<(), EventStoreError> {
    if message.aggregate_identifier() != identifier {
        return Err(EventStoreError::InvalidEventStream(format!(
            "Event {} belongs to aggregate {}, stream is for {}",
            message.identifier(),
            message.aggregate_identifier(),
            identifier
        )));
    }
    if message.sequence_number() != expected_sequence {
        return Err(EventStoreError::InvalidEventStream(format!(
            "Sequence gap in aggregate {}: expected {}, got {}",
            identifier,
            expected_sequence,
            message.sequence_number()
        )));
    }
    Ok(())
}
