//! Reconnection delays.

use crate::config::ReconnectConfig;
use std::time::Duration;

/// Exponential backoff: each delay is the previous one times a
/// multiplier, capped at a maximum, until [`reset`](Backoff::reset).
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            current: initial,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_delay(), config.max_delay(), config.multiplier)
    }

    /// Returns the delay before the next attempt and grows the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.max)
            .min(self.max);
        delay
    }

    /// Starts over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
