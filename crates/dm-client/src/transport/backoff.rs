//! Exponential reconnect backoff
//!
//! Delays double from the base up to the cap, with ±20% jitter so a
//! burst of disconnected clients does not reconnect in lockstep.
//! Attempts are bounded; exhaustion means the connection is declared
//! lost and surfaced to the caller.

use dm_common::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Jitter factor applied to each delay (±20%)
const JITTER: f64 = 0.2;

/// Bounded exponential backoff state
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Create backoff state from reconnect configuration
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            attempt: 0,
        }
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Current attempt count
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Next delay to wait before reconnecting, or `None` when attempts
    /// are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let exp = self
            .base
            .saturating_mul(1_u32.checked_shl(self.attempt).unwrap_or(u32::MAX))
            .min(self.cap);
        self.attempt += 1;

        let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        Some(exp.mul_f64(factor))
    }
}
