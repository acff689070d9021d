//! Rate limiting algorithms.
//!
//! Each algorithm is a pure state machine over its persisted state shape:
//! `consume` mutates the state and returns the verdict, `peek` projects the
//! state without changing it. Loading, locking and persisting are the
//! limiter's job, so every algorithm's invariants can be tested in isolation.
//!
//! | Algorithm | State | Fresh key |
//! |-----------|-------|-----------|
//! | [`TokenBucket`] | `BucketState` (available tokens) | full, `burst_size` |
//! | [`LeakyBucket`] | `BucketState` (occupied level) | empty |
//! | [`FixedWindow`] | `WindowState` (counter) | zero count |
//! | [`SlidingWindow`] | `WindowState` (timestamps) | no timestamps |

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::decision::Decision;
use crate::config::{AlgorithmKind, LimiterConfig};

/// A rate limiting decision procedure.
pub trait Algorithm: Send + Sync {
    /// The persisted per-key state.
    type State: Serialize + DeserializeOwned + Default + Send;

    /// Which algorithm this is.
    fn kind(&self) -> AlgorithmKind;

    /// Try to admit `n` units at `now`, updating `state` either way.
    ///
    /// On denial the state still carries refill, decay, rollover or pruning
    /// progress and must be persisted.
    fn consume(&self, state: &mut Self::State, n: u64, now: DateTime<Utc>) -> bool;

    /// Report the quota for one more unit at `now` without changing anything.
    fn peek(&self, state: &Self::State, now: DateTime<Utc>) -> Decision;
}

/// The algorithm a limiter was built with.
#[derive(Debug, Clone)]
pub enum Engine {
    TokenBucket(TokenBucket),
    FixedWindow(FixedWindow),
    SlidingWindow(SlidingWindow),
    LeakyBucket(LeakyBucket),
}

impl Engine {
    /// Build the engine described by a validated configuration.
    pub fn from_config(config: &LimiterConfig) -> Self {
        let window = config.window();
        match config.algorithm {
            AlgorithmKind::TokenBucket => Engine::TokenBucket(TokenBucket::new(
                config.rate,
                window,
                config.effective_burst_size(),
            )),
            AlgorithmKind::FixedWindow => Engine::FixedWindow(FixedWindow::new(config.rate, window)),
            AlgorithmKind::SlidingWindow => {
                Engine::SlidingWindow(SlidingWindow::new(config.rate, window))
            }
            AlgorithmKind::LeakyBucket => Engine::LeakyBucket(LeakyBucket::new(
                config.rate,
                window,
                config.effective_burst_size(),
            )),
        }
    }

    /// Which algorithm this engine runs.
    pub fn kind(&self) -> AlgorithmKind {
        match self {
            Engine::TokenBucket(a) => a.kind(),
            Engine::FixedWindow(a) => a.kind(),
            Engine::SlidingWindow(a) => a.kind(),
            Engine::LeakyBucket(a) => a.kind(),
        }
    }
}

/// `rate` units per `window_secs`, as units per second.
pub(crate) fn per_second(rate: u64, window_secs: f64) -> f64 {
    rate as f64 / window_secs
}

/// Whole units contained in a fractional level, never negative.
pub(crate) fn whole_units(level: f64) -> u64 {
    if level.is_finite() && level > 0.0 {
        level.floor() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_engine_from_config() {
        for kind in [
            AlgorithmKind::TokenBucket,
            AlgorithmKind::FixedWindow,
            AlgorithmKind::SlidingWindow,
            AlgorithmKind::LeakyBucket,
        ] {
            let config = LimiterConfig::new(kind, 10, Duration::from_secs(60));
            assert_eq!(Engine::from_config(&config).kind(), kind);
        }
    }

    #[test]
    fn test_bucket_engines_default_burst_to_rate() {
        let config = LimiterConfig::new(AlgorithmKind::LeakyBucket, 12, Duration::from_secs(60));
        match Engine::from_config(&config) {
            Engine::LeakyBucket(bucket) => assert_eq!(bucket.burst_size(), 12),
            other => panic!("unexpected engine {:?}", other),
        }
    }

    #[test]
    fn test_whole_units() {
        assert_eq!(whole_units(4.99), 4);
        assert_eq!(whole_units(-0.5), 0);
        assert_eq!(whole_units(f64::NAN), 0);
    }
}
