//! Core rate limiter implementation.

use tracing::{debug, trace, warn};

use super::key::KeyBuilder;
use super::redis_store::RedisCounterStore;
use super::store::AtomicCounterStore;
use super::window::{evaluate, Verdict, WindowConfig};
use crate::config::{LimiterConfig, WindowLimitConfig};
use crate::error::Result;

/// A fixed window rate limiter for one protected operation.
///
/// The limiter itself holds no mutable state; every count lives in the
/// counter store, so one instance can be shared across tasks behind an
/// `Arc` and many instances on different machines can share a quota
/// through the same store.
///
/// Backend failures never block traffic: when the store cannot answer,
/// [`check_and_consume`](Self::check_and_consume) admits the request. Quota
/// enforcement is therefore best-effort while the store is degraded and must
/// not be relied on as a security boundary.
pub struct FixedWindowRateLimiter<S: AtomicCounterStore> {
    /// Shared counter store
    store: S,
    /// Quota for this operation
    window: WindowConfig,
    /// Key derivation settings
    keys: KeyBuilder,
}

impl FixedWindowRateLimiter<RedisCounterStore> {
    /// Create a Redis-backed rate limiter from configuration.
    ///
    /// The Redis connection is opened on first use.
    pub fn from_config(config: &WindowLimitConfig) -> Result<Self> {
        let store = RedisCounterStore::new(&config.redis)?;
        Self::with_store(store, &config.limiter)
    }
}

impl<S: AtomicCounterStore> FixedWindowRateLimiter<S> {
    /// Create a new rate limiter.
    pub fn new(store: S, window: WindowConfig, keys: KeyBuilder) -> Self {
        Self {
            store,
            window,
            keys,
        }
    }

    /// Create a rate limiter over `store` using the limiter section of the
    /// configuration.
    pub fn with_store(store: S, config: &LimiterConfig) -> Result<Self> {
        let window = config.window()?;
        let keys = KeyBuilder::new(config.key_namespace.clone(), config.use_client_address);
        Ok(Self::new(store, window, keys))
    }

    /// Count one request against the caller's quota and decide whether it
    /// may proceed.
    ///
    /// Any counter store failure admits the request.
    pub async fn check_and_consume(&self, identity: &str, client_address: Option<&str>) -> Verdict {
        match self.try_check_and_consume(identity, client_address).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    identity = %identity,
                    error = %e,
                    "Counter store failed, admitting request"
                );
                Verdict::Admit
            }
        }
    }

    /// Like [`check_and_consume`](Self::check_and_consume) but returns
    /// counter store failures instead of admitting.
    pub async fn try_check_and_consume(
        &self,
        identity: &str,
        client_address: Option<&str>,
    ) -> Result<Verdict> {
        if identity.is_empty() {
            warn!("Empty rate limit identity, admitting without counting");
            return Ok(Verdict::Admit);
        }

        let key = self.keys.build(identity, client_address);

        trace!(key = %key, "Checking rate limit");

        let count = self
            .store
            .increment_and_expire(&key, self.window.window_size_secs())
            .await?;

        let verdict = evaluate(count, self.window.max_requests());
        if verdict == Verdict::Reject {
            debug!(
                key = %key,
                count = count,
                limit = self.window.max_requests(),
                "Rate limit exceeded"
            );
        }

        Ok(verdict)
    }

    /// Get the quota for this limiter.
    pub fn window(&self) -> &WindowConfig {
        &self.window
    }

    /// Get the key builder.
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Get the counter store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: AtomicCounterStore + std::fmt::Debug> std::fmt::Debug for FixedWindowRateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowRateLimiter")
            .field("store", &self.store)
            .field("window", &self.window)
            .field("keys", &self.keys)
            .finish()
    }
}
