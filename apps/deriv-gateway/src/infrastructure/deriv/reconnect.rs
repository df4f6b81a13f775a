//! Reconnect Backoff Policy
//!
//! Exponential backoff with jitter for connection re-establishment.
//! The policy is bounded: after `max_attempts` consecutive failures the
//! lifecycle gives up and surfaces the failure instead of retrying
//! forever.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the computed delay (0.1 = ±10%).
    pub jitter: f64,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 5,
        }
    }
}

/// Tracks consecutive failures and computes the next retry delay.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy from its tuning.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failures recorded since the last `reset`.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt budget is exhausted.
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Record a failure and return the delay before the next attempt,
    /// or `None` when the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.exhausted() {
            return None;
        }

        let exp = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(i32::try_from(self.attempt).unwrap_or(i32::MAX));
        let capped = exp.min(self.config.max_delay.as_secs_f64());

        let jittered = if self.config.jitter > 0.0 {
            let spread = capped * self.config.jitter;
            capped + rand::rng().random_range(-spread..=spread)
        } else {
            capped
        };

        self.attempt += 1;
        Some(Duration::from_secs_f64(jittered.max(0.0)))
    }

    /// Clear the failure counter after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}
