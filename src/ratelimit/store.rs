//! Counter store trait for abstracting the shared and local backends.

use async_trait::async_trait;

use super::key::RateLimitKey;
use crate::error::Result;

/// Trait for shared counter store implementations.
///
/// This trait abstracts over the Redis-backed `RedisCounterStore` and the
/// process-local `InMemoryCounterStore` so the limiter works with either.
#[async_trait]
pub trait AtomicCounterStore: Send + Sync {
    /// Increment the counter for `key` and return the post-increment value.
    ///
    /// When the returned value is 1 the key's expiry is set to
    /// `window_size_secs`; later increments in the same window leave the
    /// expiry untouched. Both steps happen as one indivisible operation.
    async fn increment_and_expire(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64>;
}

#[async_trait]
impl<T: AtomicCounterStore + ?Sized> AtomicCounterStore for std::sync::Arc<T> {
    async fn increment_and_expire(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64> {
        (**self).increment_and_expire(key, window_size_secs).await
    }
}
