// Reconnect budget: bounded exponential backoff for network faults.

use rand::RngExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the reconnect budget of a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Reconnect attempts allowed on one URL before failing over.
    pub max_attempts: u32,
    /// Delay of the first reconnect. Attempt `n` waits `base * 2^n`.
    pub base_delay_ms: u64,
    /// When true, adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            jitter: false,
        }
    }
}

/// Per-session reconnect budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    jitter: bool,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            jitter: config.jitter,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consume one attempt and return how long to wait before it.
    ///
    /// Returns `None` once `max_attempts` reconnects have been handed out.
    pub fn try_consume(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = 2u32
            .checked_pow(attempt)
            .and_then(|multiplier| self.base_delay.checked_mul(multiplier))
            .unwrap_or(Duration::MAX);

        if !self.jitter {
            return delay;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return delay;
        }
        let jitter_ms = rand::rng().random_range(0..jitter_range_ms);
        delay.saturating_add(Duration::from_millis(jitter_ms))
    }
}
