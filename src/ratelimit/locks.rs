//! Per-key exclusive locks.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Registry of one async mutex per key.
///
/// Mutations of different keys never contend; mutations of the same key run
/// one at a time. Locks are created on first use. [`KeyLocks::prune`] drops
/// locks nobody holds or waits on, so the registry tracks live keys rather
/// than every key ever seen.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock for `key`, waiting if another task holds it.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        // Clone the handle out so no map shard stays locked across the await.
        let lock = match self.locks.get(key) {
            Some(lock) => lock.clone(),
            None => self.locks.entry(key.to_string()).or_default().clone(),
        };
        lock.lock_owned().await
    }

    /// Drop every lock that is not held or awaited. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        // Only the registry holds an unused lock; any outstanding handle bumps the count.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before.saturating_sub(self.locks.len());
        trace!(removed, remaining = self.locks.len(), "Pruned idle key locks");
        removed
    }

    /// Number of registered locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no locks are registered.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
