//! Rate limiter trait for request-serving collaborators.

use async_trait::async_trait;

use super::decision::Decision;

/// Trait for rate limiter implementations.
///
/// HTTP middleware, RPC interceptors and similar layers depend on this trait
/// rather than on [`super::RateLimiter`], so they can be exercised against
/// fakes and composed with other limiters.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Try to admit `n` units for `key`.
    async fn allow_n(&self, key: &str, n: u64) -> bool;

    /// Inspect the quota for `key` without consuming it.
    async fn check(&self, key: &str) -> Decision;

    /// Try to admit a single unit for `key`.
    async fn allow(&self, key: &str) -> bool {
        self.allow_n(key, 1).await
    }
}
