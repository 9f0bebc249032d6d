//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and proportional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay that may be shaved off at random, in `[0, 1]`.
    /// 0 disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, without jitter.
    ///
    /// `attempts` is the number of failed attempts so far (1-indexed):
    /// delay = min(max_delay, base_delay * multiplier^(attempts - 1))
    ///
    /// With base_delay=2s, multiplier=2.0: 2s, 4s, 8s, 16s, ...
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before the next attempt, with jitter applied.
    ///
    /// The result lies in `[backoff * (1 - jitter), backoff]`, so jitter only
    /// ever shortens a delay and the cap still holds.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return self.backoff(attempts);
        }
        let unit: f64 = rand::thread_rng().gen_range(0.0..1.0);
        self.scaled(attempts, unit)
    }

    /// `backoff(attempts)` reduced by `jitter * unit`, `unit` in `[0, 1)`.
    fn scaled(&self, attempts: u32, unit: f64) -> Duration {
        let factor = 1.0 - self.jitter.clamp(0.0, 1.0) * unit.clamp(0.0, 1.0);
        self.backoff(attempts).mul_f64(factor)
    }
}
