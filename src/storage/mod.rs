//! Key/value storage with per-entry TTL.
//!
//! Every algorithm reads and writes its per-key state through a [`Storage`]
//! backend. The crate ships [`MemoryStorage`]; networked or on-disk backends
//! can be plugged in as long as they honor the TTL semantics below.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend was closed and can no longer be used.
    #[error("storage is closed")]
    Closed,
    /// The operation did not complete before its deadline.
    #[error("storage operation timed out after {0:?}")]
    OperationTimeout(Duration),
    /// The backend could not serve the request.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage plug-in contract.
///
/// - `get` returns `Ok(None)` for keys that were never set or whose TTL has
///   elapsed.
/// - `set` stores its own copy of `value`; a TTL of zero means "no expiry".
/// - `close` is idempotent; every other call afterwards fails with
///   [`StorageError::Closed`].
///
/// Callers bound each call with [`with_deadline`]; dropping a pending future
/// cancels the call, so implementations must not rely on running to
/// completion.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StorageResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Whether a live (unexpired) entry exists for `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Release the backend.
    async fn close(&self) -> StorageResult<()>;

    /// Purge expired entries, returning how many were removed.
    ///
    /// Backends that expire entries on their own keep the default no-op.
    async fn sweep(&self) -> StorageResult<usize> {
        Ok(0)
    }

    /// Number of stored entries, if the backend can tell cheaply.
    fn entry_count(&self) -> Option<usize> {
        None
    }
}

/// Run a storage call, failing with [`StorageError::OperationTimeout`] if it
/// does not finish within `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::OperationTimeout(deadline)),
    }
}
