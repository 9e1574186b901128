//! Fixed window quota settings and the admission decision.

use std::time::Duration;

use crate::error::{Result, WindowLimitError};

/// Longest accepted window: one year. Keeps the expiry within range of both
/// Redis `EXPIRE` and monotonic clock arithmetic.
pub const MAX_WINDOW_SIZE_SECS: u64 = 365 * 24 * 60 * 60;

/// The admission decision for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// The request is within its quota
    Admit,
    /// The request exceeded its quota for the current window
    Reject,
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// Quota for one protected operation: `max_requests` per `window_size_secs`.
///
/// Both values are validated to be positive at construction, and the window
/// to be at most [`MAX_WINDOW_SIZE_SECS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    window_size_secs: u64,
    max_requests: u64,
}

impl WindowConfig {
    /// Create a validated window configuration.
    pub fn new(window_size_secs: u64, max_requests: u64) -> Result<Self> {
        if window_size_secs == 0 {
            return Err(WindowLimitError::InvalidConfiguration(
                "window_size_secs must be positive".to_string(),
            ));
        }
        if window_size_secs > MAX_WINDOW_SIZE_SECS {
            return Err(WindowLimitError::InvalidConfiguration(format!(
                "window_size_secs must be at most {}",
                MAX_WINDOW_SIZE_SECS
            )));
        }
        if max_requests == 0 {
            return Err(WindowLimitError::InvalidConfiguration(
                "max_requests must be positive".to_string(),
            ));
        }
        Ok(Self {
            window_size_secs,
            max_requests,
        })
    }

    /// Length of one window in seconds.
    pub fn window_size_secs(&self) -> u64 {
        self.window_size_secs
    }

    /// Length of one window.
    pub fn window_size(&self) -> Duration {
        Duration::from_secs(self.window_size_secs)
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

/// Decide whether the `count`-th request of a window is admitted.
///
/// The `max_requests`-th request is still admitted; only counts strictly
/// above the limit are rejected.
pub fn evaluate(count: u64, max_requests: u64) -> Verdict {
    if count > max_requests {
        Verdict::Reject
    } else {
        Verdict::Admit
    }
}
