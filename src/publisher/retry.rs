//! Bounded linear backoff for publish retries.

use std::sync::Mutex;
use std::time::Duration;

/// When and how often a failed publish is retried.
///
/// The delay before retry `k` (1-based) is
/// `min(interval_start + interval_step * (k - 1), interval_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval_start: Duration,
    pub interval_step: Duration,
    pub interval_max: Duration,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// First retry immediately, then 2s more per retry, capped at 30s,
    /// 30 attempts in total.
    fn default() -> Self {
        Self {
            interval_start: Duration::ZERO,
            interval_step: Duration::from_secs(2),
            interval_max: Duration::from_secs(30),
            max_attempts: 30,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the given retry (1-based).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let steps = retry.saturating_sub(1);
        let delay = self
            .interval_start
            .saturating_add(self.interval_step.saturating_mul(steps));
        delay.min(self.interval_max)
    }

    /// Sum of the delays across the first `retries` retries.
    pub fn total_backoff(&self, retries: u32) -> Duration {
        (1..=retries).map(|k| self.delay_before_retry(k)).sum()
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// How the publisher waits between attempts.
pub trait Sleep: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleep {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.delays().into_iter().sum()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}
