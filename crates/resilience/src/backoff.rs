//! Exponential backoff schedule and jitter sources.
//!
//! Delays grow exponentially with each completed attempt and saturate at a
//! hard cap. Jitter spreads concurrent retriers across the delay window so
//! they do not hammer a recovering service in lockstep.

use std::time::Duration;

use rand::Rng;

/// Cap on the backoff exponent so delay math cannot overflow
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Exponential backoff schedule with a hard delay cap.
///
/// The delay before attempt `k + 1` is
/// `min(base_delay * multiplier^(k - 1), max_delay)`, with attempts indexed
/// from 1. The first inter-attempt delay therefore equals `base_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor applied per completed attempt
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self { base_delay, max_delay, multiplier }
    }

    /// Calculate the delay that follows the given completed attempt.
    ///
    /// Attempts are indexed from 1; an index of 0 is treated as 1. Large
    /// attempt numbers saturate at `max_delay` instead of overflowing.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let delay = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = delay.min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(capped)
    }
}

/// Source of randomized jitter applied to computed backoff delays.
///
/// Injectable so tests can make jitter deterministic without disabling it
/// structurally. A sample must never exceed `upper`, which keeps jittered
/// delays within the schedule's `max_delay` cap.
pub trait JitterSource: Send + Sync {
    /// Sample a delay from `[0, upper]`.
    fn sample(&self, upper: Duration) -> Duration;
}

/// Full jitter over `[0, upper]` using the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self, upper: Duration) -> Duration {
        let upper_millis = upper.as_millis() as u64;
        if upper_millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=upper_millis))
    }
}

/// Deterministic jitter returning a fixed fraction of the upper bound.
///
/// The fraction is clamped to `[0.0, 1.0]`. `FractionalJitter(1.0)` returns
/// the computed delay unchanged, which makes delay arithmetic exact in tests
/// while still exercising the jitter path.
#[derive(Debug, Clone, Copy)]
pub struct FractionalJitter(pub f64);

impl JitterSource for FractionalJitter {
    fn sample(&self, upper: Duration) -> Duration {
        let fraction = self.0.clamp(0.0, 1.0);
        Duration::from_millis((upper.as_millis() as f64 * fraction) as u64)
    }
}
