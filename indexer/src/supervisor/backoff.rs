//! Restart backoff for crashed indexers.

use std::time::Duration;

use crate::config::SupervisorConfig;

/// Exponential restart delay keyed by crash streak.
///
/// The first crash waits `initial`, each further consecutive crash
/// multiplies the delay, capped at `max`. An `initial` of zero restarts
/// immediately every time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartBackoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
}

impl RestartBackoff {
    /// Creates a backoff policy.
    #[must_use]
    pub const fn new(initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        Self {
            initial_ms,
            max_ms,
            multiplier,
        }
    }

    /// Creates the policy described by a supervisor configuration.
    #[must_use]
    pub const fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            config.restart_backoff_initial_ms,
            config.restart_backoff_max_ms,
            config.backoff_multiplier,
        )
    }

    /// Returns the delay before restarting after `streak` consecutive
    /// crashes. A streak of zero means no crash and no delay.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay(&self, streak: u32) -> Duration {
        if streak == 0 || self.initial_ms == 0 {
            return Duration::ZERO;
        }
        let mut delay = self.initial_ms;
        for _ in 1..streak {
            delay = ((delay as f64) * self.multiplier) as u64;
            if delay >= self.max_ms {
                break;
            }
        }
        Duration::from_millis(delay.min(self.max_ms))
    }
}

impl Default for RestartBackoff {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}
