//! Per-key state shapes and their persistence through [`Storage`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use super::metrics::MetricsRecorder;
use crate::error::{GatekeeperError, Result};
use crate::storage::{with_deadline, Storage};

/// Deadline for reading or writing a key's state.
pub const STATE_IO_DEADLINE: Duration = Duration::from_secs(2);

/// State of the bucket algorithms.
///
/// The same shape serves both buckets with opposite polarity:
///
/// - Token bucket: `tokens` is *available* capacity. It refills over time up
///   to the burst size and requests spend it.
/// - Leaky bucket: `tokens` is *occupied* capacity. It drains over time toward
///   zero and requests add to it.
///
/// `last_update == None` marks a bucket that has never been touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// State of the window algorithms.
///
/// `requests` is only populated by the sliding window. Units admitted at the
/// same instant share one [`LoggedRequest`], so the log grows with the number
/// of calls rather than the number of units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub count: u64,
    #[serde(default)]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<LoggedRequest>,
}

/// Units admitted at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedRequest {
    pub at: DateTime<Utc>,
    pub units: u64,
}

/// Typed view over the storage backend for algorithm state.
///
/// Reads that fail at the storage level fall back to fresh state and are
/// counted as degraded; failed writes are logged and counted but never fail
/// the decision. Undecodable entries are hard errors.
pub struct StateStore {
    storage: Arc<dyn Storage>,
    ttl: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl StateStore {
    /// Create a store that persists entries for `ttl`.
    pub fn new(storage: Arc<dyn Storage>, ttl: Duration, metrics: Arc<MetricsRecorder>) -> Self {
        Self {
            storage,
            ttl,
            metrics,
        }
    }

    /// Load the state for `key`, or the zero state if there is none.
    pub async fn load<S>(&self, key: &str) -> Result<S>
    where
        S: DeserializeOwned + Default,
    {
        match with_deadline(STATE_IO_DEADLINE, self.storage.get(key)).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).map_err(|source| {
                error!(key = %key, error = %source, "Stored state is corrupt");
                GatekeeperError::CorruptState {
                    key: key.to_string(),
                    source,
                }
            }),
            Ok(None) => Ok(S::default()),
            Err(e) => {
                warn!(key = %key, error = %e, "State read failed, treating key as fresh");
                self.metrics.record_degraded_read();
                Ok(S::default())
            }
        }
    }

    /// Persist the state for `key`.
    pub async fn save<S>(&self, key: &str, state: &S) -> Result<()>
    where
        S: Serialize,
    {
        let bytes = serde_json::to_vec(state)?;
        if let Err(e) = with_deadline(STATE_IO_DEADLINE, self.storage.set(key, &bytes, self.ttl)).await {
            warn!(key = %key, error = %e, "State write failed, decision stands");
            self.metrics.record_failed_write();
        }
        Ok(())
    }
}
