//! Core rate limiter implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use super::algorithms::{Algorithm, Engine};
use super::backend::RateLimiterBackend;
use super::clock::{Clock, SystemClock};
use super::decision::Decision;
use super::keys::{self, KeyExtractor};
use super::locks::KeyLocks;
use super::metrics::{Metrics, MetricsRecorder};
use super::state::StateStore;
use crate::config::{AlgorithmKind, LimiterConfig};
use crate::error::{GatekeeperError, Result};
use crate::storage::{with_deadline, MemoryStorage, Storage};

/// Deadline for deleting a key's state on reset.
const RESET_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for closing the storage backend.
const CLOSE_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for one backend sweep during cleanup.
const SWEEP_DEADLINE: Duration = Duration::from_secs(5);

/// The admission-control façade.
///
/// Dispatches each call to the configured algorithm, serializes mutations
/// per key, and aggregates metrics. Safe to share across tasks behind an
/// [`Arc`].
///
/// Closing is terminal: `allow`/`allow_n` return `false`, `check` returns a
/// denied [`Decision`], and `reset` fails with
/// [`GatekeeperError::LimiterClosed`].
pub struct RateLimiter {
    config: LimiterConfig,
    engine: Engine,
    storage: Arc<dyn Storage>,
    state: StateStore,
    locks: Arc<KeyLocks>,
    key_extractor: KeyExtractor,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRecorder>,
    closed: AtomicBool,
    storage_closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`RateLimiter`], for the collaborators that cannot live in a
/// configuration file.
pub struct RateLimiterBuilder {
    config: LimiterConfig,
    storage: Option<Arc<dyn Storage>>,
    key_extractor: Option<KeyExtractor>,
    clock: Option<Arc<dyn Clock>>,
}

impl RateLimiterBuilder {
    /// Use `storage` instead of a fresh [`MemoryStorage`].
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Normalize keys with `extractor` before they reach storage.
    pub fn key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = Some(extractor);
        self
    }

    /// Read time from `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and start the limiter.
    ///
    /// A non-zero cleanup interval spawns the cleanup task, which requires a
    /// running Tokio runtime.
    pub fn build(self) -> Result<RateLimiter> {
        self.config.validate()?;

        let config = self.config;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = Arc::new(MetricsRecorder::new());
        let locks = Arc::new(KeyLocks::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let cleanup_task = match config.cleanup_interval() {
            Some(period) => {
                let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                    GatekeeperError::InvalidConfiguration(
                        "cleanup_interval requires a running Tokio runtime".to_string(),
                    )
                })?;
                let cleanup = Cleanup {
                    storage: storage.clone(),
                    locks: locks.clone(),
                    metrics: metrics.clone(),
                    clock: clock.clone(),
                };
                Some(runtime.spawn(cleanup.run(period, shutdown_rx)))
            }
            None => None,
        };

        info!(
            algorithm = %config.algorithm,
            rate = config.rate,
            window = ?config.window(),
            burst_size = config.effective_burst_size(),
            cleanup_interval = ?config.cleanup_interval,
            "Rate limiter started"
        );

        Ok(RateLimiter {
            engine: Engine::from_config(&config),
            state: StateStore::new(storage.clone(), config.state_ttl(), metrics.clone()),
            config,
            storage,
            locks,
            key_extractor: self.key_extractor.unwrap_or_else(keys::identity),
            clock,
            metrics,
            closed: AtomicBool::new(false),
            storage_closed: AtomicBool::new(false),
            shutdown,
            cleanup_task: Mutex::new(cleanup_task),
        })
    }
}

impl RateLimiter {
    /// Create a limiter with in-memory storage and identity keys.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a limiter with custom collaborators.
    pub fn builder(config: LimiterConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            config,
            storage: None,
            key_extractor: None,
            clock: None,
        }
    }

    /// Try to admit a single unit for `key`.
    pub async fn allow(&self, key: &str) -> bool {
        self.allow_n(key, 1).await
    }

    /// Try to admit `n` units for `key`.
    ///
    /// Never fails: a closed limiter or an internal error both deny.
    pub async fn allow_n(&self, key: &str, n: u64) -> bool {
        match self.try_allow_n(key, n).await {
            Ok(allowed) => allowed,
            Err(GatekeeperError::LimiterClosed) => false,
            Err(e) => {
                error!(key = %key, error = %e, "Rate limit decision failed, denying");
                false
            }
        }
    }

    /// Like [`RateLimiter::allow_n`], but surfaces why a decision could not
    /// be made.
    pub async fn try_allow_n(&self, key: &str, n: u64) -> Result<bool> {
        if self.is_closed() {
            return Err(GatekeeperError::LimiterClosed);
        }

        let started = Instant::now();
        let key = (self.key_extractor)(key);

        let outcome = match &self.engine {
            Engine::TokenBucket(a) => self.consume(a, &key, n).await,
            Engine::FixedWindow(a) => self.consume(a, &key, n).await,
            Engine::SlidingWindow(a) => self.consume(a, &key, n).await,
            Engine::LeakyBucket(a) => self.consume(a, &key, n).await,
        };

        let allowed = matches!(outcome, Ok(true));
        self.metrics.record_decision(allowed, started.elapsed());

        if allowed {
            trace!(key = %key, n = n, "Request admitted");
        } else if outcome.is_ok() {
            debug!(
                key = %key,
                n = n,
                algorithm = %self.engine.kind(),
                "Rate limit exceeded"
            );
        }

        outcome
    }

    /// Inspect the quota for `key` without consuming it.
    ///
    /// Never fails: a closed limiter or an internal error report a denial.
    pub async fn check(&self, key: &str) -> Decision {
        match self.try_check(key).await {
            Ok(decision) => decision,
            Err(GatekeeperError::LimiterClosed) => Decision::closed(self.clock.now()),
            Err(e) => {
                error!(key = %key, error = %e, "Rate limit check failed");
                Decision::closed(self.clock.now())
            }
        }
    }

    /// Like [`RateLimiter::check`], but surfaces why no decision was made.
    pub async fn try_check(&self, key: &str) -> Result<Decision> {
        if self.is_closed() {
            return Err(GatekeeperError::LimiterClosed);
        }

        let key = (self.key_extractor)(key);
        match &self.engine {
            Engine::TokenBucket(a) => self.peek(a, &key).await,
            Engine::FixedWindow(a) => self.peek(a, &key).await,
            Engine::SlidingWindow(a) => self.peek(a, &key).await,
            Engine::LeakyBucket(a) => self.peek(a, &key).await,
        }
    }

    /// Forget all state for `key`; the next request sees a fresh key.
    pub async fn reset(&self, key: &str) -> Result<()> {
        if self.is_closed() {
            return Err(GatekeeperError::LimiterClosed);
        }

        let key = (self.key_extractor)(key);
        let _guard = self.locks.lock(&key).await;
        with_deadline(RESET_DEADLINE, self.storage.delete(&key)).await?;

        debug!(key = %key, "Rate limit state reset");
        Ok(())
    }

    /// A consistent snapshot of the aggregated counters.
    pub fn metrics(&self) -> Metrics {
        if let Some(entries) = self.storage.entry_count() {
            self.metrics.set_active_keys(entries);
        }
        self.metrics.snapshot()
    }

    /// Run one cleanup pass now, independent of the background schedule.
    pub async fn cleanup(&self) -> Result<()> {
        if self.is_closed() {
            return Err(GatekeeperError::LimiterClosed);
        }
        self.cleanup_pass().run_once().await;
        Ok(())
    }

    /// Stop the cleanup task and close storage.
    ///
    /// The limiter stops admitting on the first call even if storage fails to
    /// close; later calls retry the storage close until it succeeds, then
    /// return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if self.storage_closed.load(Ordering::Acquire) {
            return Ok(());
        }

        // No receiver means no cleanup task; nothing to signal.
        let _ = self.shutdown.send(true);
        let task = self.cleanup_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Cleanup task ended abnormally");
            }
        }

        if let Err(e) = with_deadline(CLOSE_DEADLINE, self.storage.close()).await {
            warn!(error = %e, "Storage close failed, will retry on next close");
            return Err(e.into());
        }
        if !self.storage_closed.swap(true, Ordering::AcqRel) {
            info!(algorithm = %self.engine.kind(), "Rate limiter closed");
        }
        Ok(())
    }

    /// Whether [`RateLimiter::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The algorithm this limiter runs.
    pub fn algorithm(&self) -> AlgorithmKind {
        self.engine.kind()
    }

    /// Load, decide and persist under the key's lock.
    async fn consume<A: Algorithm>(&self, algorithm: &A, key: &str, n: u64) -> Result<bool> {
        let _guard = self.locks.lock(key).await;

        let mut state: A::State = self.state.load(key).await?;
        let allowed = algorithm.consume(&mut state, n, self.clock.now());
        self.state.save(key, &state).await?;

        Ok(allowed)
    }

    /// Read-only projection; takes no lock and may be one write behind.
    async fn peek<A: Algorithm>(&self, algorithm: &A, key: &str) -> Result<Decision> {
        let state: A::State = self.state.load(key).await?;
        Ok(algorithm.peek(&state, self.clock.now()))
    }

    fn cleanup_pass(&self) -> Cleanup {
        Cleanup {
            storage: self.storage.clone(),
            locks: self.locks.clone(),
            metrics: self.metrics.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl RateLimiterBackend for RateLimiter {
    async fn allow_n(&self, key: &str, n: u64) -> bool {
        RateLimiter::allow_n(self, key, n).await
    }

    async fn check(&self, key: &str) -> Decision {
        RateLimiter::check(self, key).await
    }
}

/// Periodic maintenance: backend sweep, idle lock pruning, metrics update.
struct Cleanup {
    storage: Arc<dyn Storage>,
    locks: Arc<KeyLocks>,
    metrics: Arc<MetricsRecorder>,
    clock: Arc<dyn Clock>,
}

impl Cleanup {
    /// Tick every `period` until `shutdown` flips or its sender is dropped.
    async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(period_ms = period.as_millis() as u64, "Cleanup loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("Cleanup loop stopping");
                    break;
                }
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }

    async fn run_once(&self) {
        let purged = match with_deadline(SWEEP_DEADLINE, self.storage.sweep()).await {
            Ok(purged) => purged,
            Err(e) => {
                warn!(error = %e, "Storage sweep failed");
                0
            }
        };
        let pruned_locks = self.locks.prune();
        let active_keys = self
            .storage
            .entry_count()
            .unwrap_or_else(|| self.locks.len());

        self.metrics.record_cleanup(self.clock.now(), active_keys);
        debug!(purged, pruned_locks, active_keys, "Cleanup pass complete");
    }
}
