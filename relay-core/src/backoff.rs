//! Delay math for reconnection and per-recipient throttling.
//!
//! The async sleeping lives in the tokio layer; this module only decides
//! how long to wait.

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Exponential backoff for automatic reconnection:
/// `base_delay * backoff_factor^attempt`, for at most `max_attempts` tries.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * factor.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// A uniformly random delay within `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    min: Duration,
    max: Duration,
}

impl Jitter {
    /// `base ± spread`, clamped at zero.
    pub fn around(base: Duration, spread: Duration) -> Self {
        Self {
            min: base.saturating_sub(spread),
            max: base.saturating_add(spread),
        }
    }

    pub fn between(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        if lo >= hi {
            return self.min;
        }
        Duration::from_millis(rng.random_range(lo..=hi))
    }
}
