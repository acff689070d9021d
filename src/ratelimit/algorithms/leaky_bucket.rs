//! Leaky bucket.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::{per_second, whole_units, Algorithm};
use crate::config::AlgorithmKind;
use crate::ratelimit::clock::{add_duration, elapsed_secs, secs_to_duration};
use crate::ratelimit::decision::Decision;
use crate::ratelimit::state::BucketState;

/// Admitted units fill the bucket, which drains at `rate` per `window`.
/// A request is rejected if it would push the level above `burst_size`.
///
/// Here `tokens` is the *occupied* level, the inverse of [`super::TokenBucket`]:
/// a fresh bucket starts empty and is maximally permissive.
#[derive(Debug, Clone)]
pub struct LeakyBucket {
    rate: u64,
    window_secs: f64,
    burst_size: u64,
}

impl LeakyBucket {
    pub fn new(rate: u64, window: Duration, burst_size: u64) -> Self {
        Self {
            rate,
            window_secs: window.as_secs_f64(),
            burst_size,
        }
    }

    pub fn burst_size(&self) -> u64 {
        self.burst_size
    }

    /// Level at `now`, after draining since the last update.
    fn level(&self, state: &BucketState, now: DateTime<Utc>) -> f64 {
        match state.last_update {
            None => 0.0,
            Some(last) => {
                let leaked = elapsed_secs(last, now) * self.rate as f64 / self.window_secs;
                (state.tokens - leaked).max(0.0)
            }
        }
    }

    /// Seconds needed to drain `units`.
    fn secs_to_drain(&self, units: f64) -> f64 {
        units * self.window_secs / self.rate as f64
    }
}

impl Algorithm for LeakyBucket {
    type State = BucketState;

    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LeakyBucket
    }

    fn consume(&self, state: &mut BucketState, n: u64, now: DateTime<Utc>) -> bool {
        state.tokens = self.level(state, now);
        state.last_update = Some(now);

        let requested = n as f64;
        if state.tokens + requested <= self.burst_size as f64 {
            state.tokens += requested;
            true
        } else {
            false
        }
    }

    fn peek(&self, state: &BucketState, now: DateTime<Utc>) -> Decision {
        let level = self.level(state, now);
        let available = self.burst_size as f64 - level;

        let retry_after = if available < 1.0 {
            secs_to_duration(self.secs_to_drain(1.0 - available))
        } else {
            Duration::ZERO
        };

        let mut metadata = Decision::metadata_for(self.kind());
        metadata.insert("current_level".to_string(), Value::from(level));
        metadata.insert("available_space".to_string(), Value::from(available));
        metadata.insert(
            "leak_rate".to_string(),
            Value::from(per_second(self.rate, self.window_secs)),
        );

        Decision {
            allowed: available >= 1.0,
            remaining: whole_units(available),
            reset_time: add_duration(now, secs_to_duration(self.secs_to_drain(level))),
            retry_after,
            metadata,
        }
    }
}
