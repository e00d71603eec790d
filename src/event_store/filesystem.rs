//! Filesystem storage medium
//!
//! One append-only file per aggregate stream, with snapshots in a sibling file.
//!
//! # File Format (per message)
//! ```text
//! [frame_len: u32 LE][serialized message: frame_len bytes]
//! ```
//!
//! A batch is written with a single append after all of its frames are
//! encoded. A trailing frame cut short by a crash is ignored on read and cut
//! off before the next append to the file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::domain::DomainEventMessage;
use crate::serializer::Serializer;

use super::locks::{StreamGuard, StreamLocks};
use super::{AggregateStreamHandle, EventStorage, EventStoreError};

const EVENTS_EXTENSION: &str = "events";
const SNAPSHOTS_EXTENSION: &str = "snapshots";
const FRAME_HEADER_LEN: usize = 4;

/// Event storage on the local filesystem
#[derive(Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
    serializer: Arc<dyn Serializer>,
    locks: Arc<StreamLocks>,
}

impl FilesystemStorage {
    /// Create a storage rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            root: root.into(),
            serializer,
            locks: Arc::new(StreamLocks::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stream_path(
        &self,
        aggregate_type: &str,
        identifier: &str,
        extension: &str,
    ) -> Result<PathBuf, EventStoreError> {
        validate_path_segment(aggregate_type)?;
        validate_path_segment(identifier)?;
        Ok(self
            .root
            .join(aggregate_type)
            .join(format!("{}.{}", identifier, extension)))
    }

    fn encode(&self, message: &DomainEventMessage, buf: &mut Vec<u8>) -> Result<(), EventStoreError> {
        let body = self.serializer.serialize(message)?;
        let len = u32::try_from(body.len()).map_err(|_| {
            EventStoreError::InvalidEventStream(format!(
                "Serialized event {} exceeds the maximum frame size",
                message.identifier()
            ))
        })?;
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(())
    }

    async fn read_frames(&self, path: &Path) -> Result<Vec<DomainEventMessage>, EventStoreError> {
        let data = fs::read(path).await?;
        let (frames, complete_len) = split_frames(&data);
        if complete_len < data.len() {
            tracing::warn!(
                path = %path.display(),
                offset = complete_len,
                "Ignoring truncated trailing frame"
            );
        }

        frames
            .into_iter()
            .map(|(offset, body)| {
                self.serializer.deserialize(body).map_err(|e| {
                    EventStoreError::Corrupted(format!(
                        "{} at offset {}: {}",
                        path.display(),
                        offset,
                        e
                    ))
                })
            })
            .collect()
    }

    /// Cut a torn trailing frame off the file before appending to it.
    ///
    /// Returns whether any complete frame remains. A file left without one
    /// is removed. Callers must hold the aggregate's lock.
    async fn repair_tail(&self, path: &Path) -> Result<bool, EventStoreError> {
        if !fs::try_exists(path).await? {
            return Ok(false);
        }
        let data = fs::read(path).await?;
        let (_, complete_len) = split_frames(&data);
        if complete_len == data.len() {
            return Ok(complete_len > 0);
        }

        tracing::warn!(
            path = %path.display(),
            offset = complete_len,
            discarded = data.len() - complete_len,
            "Truncating torn trailing frame"
        );
        if complete_len == 0 {
            fs::remove_file(path).await?;
            return Ok(false);
        }
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(complete_len as u64).await?;
        file.sync_data().await?;
        Ok(true)
    }

    /// Append whole frames; on failure the file is cut back to its prior length
    async fn append_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), EventStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let prior_len = file.metadata().await?.len();

        let written = match file.write_all(bytes).await {
            Ok(()) => file.sync_data().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(truncate_err) = file.set_len(prior_len).await {
                tracing::error!(
                    path = %path.display(),
                    error = %truncate_err,
                    "Unable to discard partially written frames"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }
}

/// Split `data` into `(offset, body)` frames.
///
/// Also returns the length of the leading run of complete frames; anything
/// past it is a torn tail.
fn split_frames(data: &[u8]) -> (Vec<(usize, &[u8])>, usize) {
    let mut frames = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos >= FRAME_HEADER_LEN {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&data[pos..pos + FRAME_HEADER_LEN]);
        let len = u32::from_le_bytes(header) as usize;
        let start = pos + FRAME_HEADER_LEN;
        if data.len() - start < len {
            break;
        }
        frames.push((pos, &data[start..start + len]));
        pos = start + len;
    }

    (frames, pos)
}

/// Reject names that would escape the storage root or collide with our layout
fn validate_path_segment(segment: &str) -> Result<(), EventStoreError> {
    let invalid = segment.is_empty()
        || segment.starts_with('.')
        || segment
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0');
    if invalid {
        return Err(EventStoreError::InvalidIdentifier(format!(
            "'{}' cannot be used as a file name",
            segment
        )));
    }
    Ok(())
}

#[async_trait]
impl EventStorage for FilesystemStorage {
    async fn event_stream_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError> {
        let path = self.stream_path(aggregate_type, identifier, EVENTS_EXTENSION)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn open_for_append(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Box<dyn AggregateStreamHandle>, EventStoreError> {
        let path = self.stream_path(aggregate_type, identifier, EVENTS_EXTENSION)?;
        let guard = self.locks.acquire(aggregate_type, identifier).await;
        let existed = self.repair_tail(&path).await?;

        Ok(Box::new(FileStreamHandle {
            path,
            storage: self.clone(),
            buffer: Vec::new(),
            existed,
            _guard: guard,
        }))
    }

    async fn read_event_stream(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Vec<DomainEventMessage>, EventStoreError> {
        let path = self.stream_path(aggregate_type, identifier, EVENTS_EXTENSION)?;
        if !fs::try_exists(&path).await? {
            return Err(EventStoreError::stream_not_found(aggregate_type, identifier));
        }
        self.read_frames(&path).await
    }

    async fn snapshot_exists(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<bool, EventStoreError> {
        let path = self.stream_path(aggregate_type, identifier, SNAPSHOTS_EXTENSION)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read_latest_snapshot(
        &self,
        aggregate_type: &str,
        identifier: &str,
    ) -> Result<Option<DomainEventMessage>, EventStoreError> {
        if !self.snapshot_exists(aggregate_type, identifier).await? {
            return Ok(None);
        }
        let path = self.stream_path(aggregate_type, identifier, SNAPSHOTS_EXTENSION)?;
        let snapshots = self.read_frames(&path).await?;
        Ok(snapshots
            .into_iter()
            .max_by_key(|snapshot| snapshot.sequence_number()))
    }

    async fn write_snapshot(
        &self,
        aggregate_type: &str,
        snapshot: &DomainEventMessage,
    ) -> Result<(), EventStoreError> {
        let identifier = snapshot.aggregate_identifier();
        let path = self.stream_path(aggregate_type, identifier, SNAPSHOTS_EXTENSION)?;
        let mut buf = Vec::new();
        self.encode(snapshot, &mut buf)?;

        let _guard = self.locks.acquire(aggregate_type, identifier).await;
        self.repair_tail(&path).await?;
        self.append_bytes(&path, &buf).await
    }
}

struct FileStreamHandle {
    path: PathBuf,
    storage: FilesystemStorage,
    buffer: Vec<u8>,
    existed: bool,
    _guard: StreamGuard,
}

#[async_trait]
impl AggregateStreamHandle for FileStreamHandle {
    fn stream_existed(&self) -> bool {
        self.existed
    }

    async fn write(&mut self, message: &DomainEventMessage) -> Result<(), EventStoreError> {
        self.storage.encode(message, &mut self.buffer)
    }

    async fn commit(self: Box<Self>) -> Result<(), EventStoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.storage.append_bytes(&self.path, &self.buffer).await
    }
}
