//! Retry policy: decides backoff delays after consecutive failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff for a poll loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Growth factor per additional consecutive failure.
    pub multiplier: f64,
    /// Delays never exceed this.
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15 * 60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    /// (1-indexed): `base_delay * multiplier^(failures - 1)`, capped at
    /// `max_delay`, without jitter.
    ///
    /// With the defaults: 30s, 60s, 120s, 240s, ... up to 15 minutes.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// [`Self::next_delay`] plus up to `jitter * delay` of random spread,
    /// still capped at `max_delay`.
    pub fn next_delay_with_jitter(&self, failures: u32) -> Duration {
        let delay = self.next_delay(failures);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * jitter;
        let extra = rand::thread_rng().gen_range(0.0..=spread);
        (delay + Duration::from_secs_f64(extra)).min(self.max_delay)
    }
}
