// src/scheduler/backoff.rs
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with multiplicative jitter.
///
/// `delay(n) = min(base * 2^(n-1), max) * U(1 - jitter, 1 + jitter)`, clamped
/// to `[1s, max]`. `n` is the number of consecutive failures (n >= 1).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(3600),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_secs: u64, max_secs: u64) -> Self {
        let base = Duration::from_secs(base_secs.max(1));
        Self {
            base,
            max: Duration::from_secs(max_secs).max(base),
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let nominal = self.nominal(failures);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter))
        } else {
            1.0
        };
        let secs = (nominal.as_secs_f64() * factor)
            .clamp(1.0, self.max.as_secs_f64().max(1.0));
        Duration::from_secs_f64(secs)
    }

    /// Delay without jitter.
    pub fn nominal(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        let mult = 1u64 << exp;
        let secs = self.base.as_secs().saturating_mul(mult);
        Duration::from_secs(secs).min(self.max)
    }
}
