//! Windowlimit - Fixed Window Rate Limiting
//!
//! This crate enforces a per-key request quota over a fixed time window that
//! is shared by any number of concurrent callers. Callers coordinate only
//! through a shared counter store (Redis in production) whose atomic
//! increment-and-expire script keeps counts exact under contention.
//!
//! When the store is unavailable the limiter admits requests rather than
//! blocking traffic.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod telemetry;

pub use crate::config::WindowLimitConfig;
pub use error::{Result, WindowLimitError};
pub use ratelimit::{FixedWindowRateLimiter, Verdict};
