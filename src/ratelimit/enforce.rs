//! Helpers for enforcement points that guard an operation with a limiter.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;

use super::limiter::FixedWindowRateLimiter;
use super::store::AtomicCounterStore;
use super::window::Verdict;

/// HTTP status conventionally returned for a rejected request.
pub const TOO_MANY_REQUESTS_STATUS: u16 = 429;

/// Trait for anything that can admit or reject a request.
///
/// Enforcement points depend on this rather than on a concrete limiter so a
/// different accounting scheme can be swapped in.
#[async_trait]
pub trait AdmissionControl: Send + Sync {
    /// Count one request for `identity` and decide whether it may proceed.
    async fn check_and_consume(&self, identity: &str, client_address: Option<&str>) -> Verdict;
}

#[async_trait]
impl<S: AtomicCounterStore> AdmissionControl for FixedWindowRateLimiter<S> {
    async fn check_and_consume(&self, identity: &str, client_address: Option<&str>) -> Verdict {
        FixedWindowRateLimiter::check_and_consume(self, identity, client_address).await
    }
}

/// The protected operation was skipped because its caller is over quota.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("too many requests")]
pub struct TooManyRequests;

impl TooManyRequests {
    /// Status code for protocol adapters that speak HTTP.
    pub fn status_code(&self) -> u16 {
        TOO_MANY_REQUESTS_STATUS
    }
}

/// Run `operation` only if the limiter admits the request.
///
/// The verdict is obtained exactly once before the operation is polled. On
/// rejection the operation is dropped without ever being polled.
pub async fn enforce<A, F, T>(
    limiter: &A,
    identity: &str,
    client_address: Option<&str>,
    operation: F,
) -> Result<T, TooManyRequests>
where
    A: AdmissionControl + ?Sized,
    F: Future<Output = T>,
{
    match limiter.check_and_consume(identity, client_address).await {
        Verdict::Admit => Ok(operation.await),
        Verdict::Reject => Err(TooManyRequests),
    }
}
