//! Exponential backoff with jitter for reconnect delays.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Stateful delay source for the reconnect loop.
///
/// The session loop is the sole caller; both methods take `&mut self`, so
/// implementations never see concurrent calls.
pub trait Backoff: Send + Sync {
    /// Next delay to apply before reconnecting.
    fn delay(&mut self) -> Duration;

    /// Return the state to the configured minimum.
    fn reset(&mut self);
}

/// Exponential growth with proportional jitter, capped at a maximum.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.min;
        Self { config, current }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&mut self) -> Duration {
        let base = self.current;
        let next = base.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(next.min(self.config.max.as_secs_f64()));
        let max_jitter = Duration::from_secs_f64(base.as_secs_f64() * self.config.jitter);
        add_jitter(base, max_jitter)
    }

    fn reset(&mut self) {
        self.current = self.config.min;
    }
}

/// `duration` plus a uniform random amount in `[0, max_jitter)`.
pub fn add_jitter(duration: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return duration;
    }
    duration + rand::thread_rng().gen_range(Duration::ZERO..max_jitter)
}
