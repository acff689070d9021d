//! Aggregated limiter metrics.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::time::Duration;

/// Smoothing factor for the latency moving average.
const LATENCY_ALPHA: f64 = 0.1;

/// A point-in-time snapshot of a limiter's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    /// Decisions made by `allow`/`allow_n`
    pub total_requests: u64,
    /// Decisions that admitted the request
    pub allowed_requests: u64,
    /// Decisions that rejected the request
    pub denied_requests: u64,
    /// Exponentially weighted moving average of decision latency
    pub average_latency: Duration,
    /// When the background cleanup last ran
    pub last_cleanup: Option<DateTime<Utc>>,
    /// Keys with live state (advisory)
    pub active_keys: usize,
    /// Storage reads that failed and fell back to fresh state
    pub degraded_reads: u64,
    /// Storage writes that failed after a decision was made
    pub failed_writes: u64,
}

/// Limiter-wide metrics aggregator.
///
/// Each decision updates its counters and the latency average under one
/// write lock, so snapshots always satisfy
/// `allowed_requests + denied_requests == total_requests`.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: RwLock<Metrics>,
}

impl MetricsRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decision and how long it took.
    pub fn record_decision(&self, allowed: bool, latency: Duration) {
        let mut metrics = self.inner.write();
        metrics.total_requests += 1;
        if allowed {
            metrics.allowed_requests += 1;
        } else {
            metrics.denied_requests += 1;
        }

        metrics.average_latency = if metrics.total_requests == 1 {
            latency
        } else {
            let average = metrics.average_latency.as_secs_f64() * (1.0 - LATENCY_ALPHA)
                + latency.as_secs_f64() * LATENCY_ALPHA;
            Duration::from_secs_f64(average)
        };
    }

    /// Record a storage read that failed and was treated as fresh state.
    pub fn record_degraded_read(&self) {
        self.inner.write().degraded_reads += 1;
    }

    /// Record a storage write that failed.
    pub fn record_failed_write(&self) {
        self.inner.write().failed_writes += 1;
    }

    /// Record a completed cleanup pass.
    pub fn record_cleanup(&self, at: DateTime<Utc>, active_keys: usize) {
        let mut metrics = self.inner.write();
        metrics.last_cleanup = Some(at);
        metrics.active_keys = active_keys;
    }

    /// Update the advisory live-key count.
    pub fn set_active_keys(&self, active_keys: usize) {
        self.inner.write().active_keys = active_keys;
    }

    /// A consistent copy of the current counters.
    pub fn snapshot(&self) -> Metrics {
        self.inner.read().clone()
    }
}
