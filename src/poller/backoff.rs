//! Retry delay policy for failing devices.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay after the first failure (1 second).
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Default growth factor (1.0 = fixed delay).
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.0;

/// Upper bound applied when no explicit cap is configured, so that a growing
/// delay cannot overflow.
const UNCAPPED_CEILING: Duration = Duration::from_secs(3600);

fn default_initial() -> Duration {
    DEFAULT_BACKOFF_INITIAL
}

fn default_multiplier() -> f64 {
    DEFAULT_BACKOFF_MULTIPLIER
}

/// Delay between retries of a failing fetch.
///
/// The delay after the n-th consecutive failure is
/// `initial * multiplier^(n-1)`, limited by `max`. Retries never stop; the
/// policy only decides how long to wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    #[serde(default = "default_initial", with = "humantime_serde")]
    pub initial: Duration,
    /// Growth factor per consecutive failure (>= 1.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Optional cap on the delay.
    #[serde(default, with = "humantime_serde")]
    pub max: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_BACKOFF_INITIAL)
    }
}

impl BackoffPolicy {
    /// Constant delay between retries.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            multiplier: 1.0,
            max: None,
        }
    }

    /// Exponentially growing delay, capped at `max`.
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max: Some(max),
        }
    }

    /// Delay to wait after `consecutive_failures` failures in a row.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let cap = self.max.unwrap_or(UNCAPPED_CEILING);
        let exponent = consecutive_failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial.as_secs_f64() * factor;

        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(cap))
            .unwrap_or(cap)
    }
}
