// src/engine/retry.rs

//! Exponential backoff for failed attempts.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// `min(2^retry_count, cap)` seconds, saturating for large counts.
pub fn backoff_delay(retry_count: u32, cap: Duration) -> Duration {
    let secs = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(cap)
}

/// One scheduled re-execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTask {
    pub id: String,
    /// 1-based attempt number; equals `retry_count` after the increment.
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
}

/// Source of retry delays.
///
/// Production uses [`TokioRetryTimer`]; tests substitute a timer that does
/// not actually wait out the full backoff.
pub trait RetryTimer: Send + Sync + Debug {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRetryTimer;

impl RetryTimer for TokioRetryTimer {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(delay))
    }
}
