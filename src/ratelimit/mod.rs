//! Rate limiting algorithms, per-key state and the limiter façade.

pub mod algorithms;
mod backend;
pub mod clock;
mod decision;
pub mod keys;
mod limiter;
mod locks;
mod metrics;
mod state;

pub use algorithms::{Algorithm, Engine, FixedWindow, LeakyBucket, SlidingWindow, TokenBucket};
pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::Decision;
pub use keys::KeyExtractor;
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use locks::KeyLocks;
pub use metrics::{Metrics, MetricsRecorder};
pub use state::{BucketState, LoggedRequest, StateStore, WindowState};
