//! In-memory reference storage backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{Storage, StorageError, StorageResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    /// `None` for entries stored without a TTL
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A process-local [`Storage`] backend.
///
/// Entries live in a single map guarded by a reader/writer lock. Expired
/// entries are evicted lazily on access and in bulk by [`MemoryStorage::purge_expired`].
/// Expiry is measured on Tokio's clock, so paused-time tests can drive it.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Entry>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Look up a live entry, evicting it if it has expired.
    fn live_value(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent set may have refreshed it.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            debug!(key = %key, "Evicted expired entry");
        }
        None
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StorageResult<()> {
        self.ensure_open()?;
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };

        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.live_value(key).is_some())
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.entries.write().clear();
        }
        Ok(())
    }

    async fn sweep(&self) -> StorageResult<usize> {
        self.ensure_open()?;
        Ok(self.purge_expired())
    }

    fn entry_count(&self) -> Option<usize> {
        Some(self.len())
    }
}
