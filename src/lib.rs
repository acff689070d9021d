//! Gatekeeper - Keyed Admission Control
//!
//! This crate decides, per caller-supplied key, whether a request may proceed
//! right now. It offers four interchangeable algorithms (token bucket, fixed
//! window, sliding window log and leaky bucket) behind one [`RateLimiter`]
//! façade, with pluggable TTL storage, per-key serialization of updates and
//! aggregated metrics.
//!
//! ```no_run
//! use std::time::Duration;
//! use gatekeeper::{AlgorithmKind, LimiterConfig, RateLimiter};
//!
//! # async fn run() -> gatekeeper::Result<()> {
//! let config = LimiterConfig::new(AlgorithmKind::TokenBucket, 10, Duration::from_secs(60))
//!     .with_burst_size(5);
//! let limiter = RateLimiter::new(config)?;
//!
//! if limiter.allow("client-42").await {
//!     // serve the request
//! }
//! limiter.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod storage;

pub use config::{AlgorithmKind, LimiterConfig};
pub use error::{GatekeeperError, Result};
pub use ratelimit::{Decision, Metrics, RateLimiter, RateLimiterBackend};
pub use storage::{MemoryStorage, Storage, StorageError};
