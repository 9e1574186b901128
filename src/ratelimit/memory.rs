//! Process-local counter store.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::key::RateLimitKey;
use super::store::AtomicCounterStore;
use crate::error::{Result, WindowLimitError};

/// A counter and the instant its window ends.
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// An in-memory counter store with per-key expiry.
///
/// All updates go through a single mutex, so increments are linearizable
/// across threads sharing one instance. Expiry uses the tokio clock, which
/// lets tests pause and advance time. Only useful within a single process.
///
/// Expired counters stay in the map until the same key is used again or
/// [`purge_expired`](Self::purge_expired) runs; long-lived stores should
/// call [`spawn_cleanup_task`](Self::spawn_cleanup_task) once.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<RateLimitKey, Counter>>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for a key, or `None` if absent or expired.
    pub fn count(&self, key: &RateLimitKey) -> Option<u64> {
        let now = Instant::now();
        let counters = self.counters.lock();
        counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.count)
    }

    /// Remaining time to live for a key, or `None` if absent or expired.
    pub fn ttl(&self, key: &RateLimitKey) -> Option<Duration> {
        let now = Instant::now();
        let counters = self.counters.lock();
        counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.expires_at - now)
    }

    /// Drop expired counters.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, c| !c.is_expired(now));
        before - counters.len()
    }

    /// Purge expired counters every `interval` until the store is dropped.
    ///
    /// The task holds only a weak reference and exits on the first tick after
    /// the last strong reference goes away.
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately.
            interval_timer.tick().await;
            loop {
                interval_timer.tick().await;
                let Some(store) = store.upgrade() else {
                    debug!("Counter store dropped, stopping cleanup task");
                    return;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged = purged, "Purged expired in-memory counters");
                }
            }
        })
    }

    /// Number of counters held, expired ones included.
    pub fn entry_count(&self) -> usize {
        self.counters.lock().len()
    }

    /// Get the number of live counters.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let counters = self.counters.lock();
        counters.values().filter(|c| !c.is_expired(now)).count()
    }

    /// Whether the store holds no live counters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn increment(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(Duration::from_secs(window_size_secs))
            .ok_or_else(|| {
                WindowLimitError::Backend(format!("window of {}s overflows the clock", window_size_secs))
            })?;

        let mut counters = self.counters.lock();

        let counter = counters.entry(key.clone()).or_insert(Counter {
            count: 0,
            expires_at: now,
        });

        // An expired counter behaves as absent.
        if counter.is_expired(now) {
            counter.count = 0;
        }

        counter.count += 1;
        if counter.count == 1 {
            counter.expires_at = expires_at;
        }

        Ok(counter.count)
    }
}

#[async_trait]
impl AtomicCounterStore for InMemoryCounterStore {
    async fn increment_and_expire(&self, key: &RateLimitKey, window_size_secs: u64) -> Result<u64> {
        let count = self.increment(key, window_size_secs)?;
        trace!(key = %key, count = count, "Incremented in-memory counter");
        Ok(count)
    }
}
