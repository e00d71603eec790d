//! Per-aggregate append locks for media without native locking.
//!
//! An entry lives only while some task holds or waits for its lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Registry = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

#[derive(Debug, Default)]
pub(crate) struct StreamLocks {
    entries: Registry,
}

impl StreamLocks {
    /// Wait for exclusive access to the aggregate's stream
    pub(crate) async fn acquire(&self, aggregate_type: &str, identifier: &str) -> StreamGuard {
        let key = format!("{}/{}", aggregate_type, identifier);
        let lock = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(key.clone()).or_default().clone()
        };

        StreamGuard {
            key,
            entries: self.entries.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive acquisition of one aggregate stream
pub(crate) struct StreamGuard {
    key: String,
    entries: Registry,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Clones of the lock are only taken under the registry mutex, so a
        // count of one here means nobody else holds or awaits it
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        if entries
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(&self.key);
        }
    }
}
