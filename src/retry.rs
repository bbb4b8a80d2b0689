//! Retry policy and injectable clock.
//!
//! Attempts are zero-based. The default exponential backoff waits
//! `base * 2^attempt` after a failed attempt, so with a one second base the
//! waits are 1 s, 2 s, 4 s. No wait follows the final attempt.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `base_ms * 2^attempt`, saturating.
    Exponential {
        /// Wait after attempt 0.
        base_ms: u64,
    },
    /// Same wait after every attempt.
    Fixed {
        /// Wait in milliseconds.
        delay_ms: u64,
    },
    /// Retry immediately.
    None,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { base_ms: 1000 }
    }
}

impl BackoffStrategy {
    /// Wait after the failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Exponential { base_ms } => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::None => Duration::ZERO,
        }
    }
}

/// Retry policy for one section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Wait between attempts.
    pub backoff: BackoffStrategy,
    /// Per-call deadline for the oracle; `None` disables it.
    pub call_timeout_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::default(),
            call_timeout_secs: Some(120),
        }
    }
}

impl RetryPolicy {
    /// Policy without waits, for tests and offline runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::None,
            ..Self::default()
        }
    }

    /// Total oracle calls allowed per section.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait after the failed attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Per-call deadline.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Source of backoff sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Clock that records requested sleeps and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    /// Create a recording clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Sum of requested sleeps.
    pub fn total(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}
