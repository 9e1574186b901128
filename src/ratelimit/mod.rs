//! Fixed window rate limiting over a shared counter store.

mod enforce;
mod key;
mod limiter;
mod memory;
mod redis_store;
mod store;
mod window;

pub use enforce::{enforce, AdmissionControl, TooManyRequests, TOO_MANY_REQUESTS_STATUS};
pub use key::{KeyBuilder, RateLimitKey};
pub use limiter::FixedWindowRateLimiter;
pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::AtomicCounterStore;
pub use window::{evaluate, Verdict, WindowConfig, MAX_WINDOW_SIZE_SECS};
