//! Resend delay policies.
//!
//! The delay after the n-th consecutive failure starts at the configured
//! initial timeout, never decreases, and never exceeds the configured maximum.
//! The growth law is swappable through [`ResendPolicy`].

use std::fmt::Debug;
use std::time::Duration;

/// Growth law of the resend timer.
pub trait ResendPolicy: Send + Sync + Debug {
    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-based), bounded by `[initial, max]`.
    fn delay(&self, failures: u32, initial: Duration, max: Duration) -> Duration;
}

/// Multiplies the delay on each failure.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Backoff multiplier (e.g., 2.0 for doubling).
    pub multiplier: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { multiplier: 2.0 }
    }
}

impl ResendPolicy for ExponentialBackoff {
    fn delay(&self, failures: u32, initial: Duration, max: Duration) -> Duration {
        let max = max.max(initial);
        let base = initial.as_secs_f64()
            * self
                .multiplier
                .max(1.0)
                .powi(failures.saturating_sub(1).min(i32::MAX as u32) as i32);
        if !base.is_finite() || base >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(base).clamp(initial, max)
    }
}

/// Adds the initial delay on each failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBackoff;

impl ResendPolicy for LinearBackoff {
    fn delay(&self, failures: u32, initial: Duration, max: Duration) -> Duration {
        let max = max.max(initial);
        initial
            .checked_mul(failures.max(1))
            .map_or(max, |d| d.clamp(initial, max))
    }
}
