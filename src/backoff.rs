//! Inter-batch backoff: a base delay plus a bounded random jitter.
//!
//! The random source is injected so tests can pin the delay exactly.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

/// Source of jitter values in `0..=max_ms`.
pub trait JitterSource: Send + Sync {
    fn jitter_ms(&self, max_ms: u64) -> u64;
}

/// Thread-local RNG; the production default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        rand::rng().random_range(0..=max_ms)
    }
}

/// Reproducible jitter from a fixed seed.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..=max_ms),
            Err(_) => 0,
        }
    }
}

/// Always returns the same value (capped at `max_ms`).
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub u64);

impl JitterSource for FixedJitter {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        self.0.min(max_ms)
    }
}

/// `base_delay_ms + jitter(0..=jitter_ms)` between consecutive batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 250,
            jitter_ms: 250,
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            base_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    pub fn delay(&self, jitter: &dyn JitterSource) -> Duration {
        let extra = jitter.jitter_ms(self.jitter_ms).min(self.jitter_ms);
        Duration::from_millis(self.base_delay_ms.saturating_add(extra))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_add(self.jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_jitter_is_exact_and_capped() {
        let p = BackoffPolicy {
            base_delay_ms: 100,
            jitter_ms: 50,
        };
        assert_eq!(p.delay(&FixedJitter(20)), Duration::from_millis(120));
        assert_eq!(p.delay(&FixedJitter(500)), Duration::from_millis(150));
    }

    #[test]
    fn seeded_jitter_is_reproducible_and_bounded() {
        let p = BackoffPolicy::default();
        let a = SeededJitter::new(7);
        let b = SeededJitter::new(7);
        for _ in 0..32 {
            let da = p.delay(&a);
            assert_eq!(da, p.delay(&b));
            assert!(da >= Duration::from_millis(p.base_delay_ms));
            assert!(da <= p.max_delay());
        }
    }

    #[test]
    fn none_policy_has_no_delay() {
        assert_eq!(BackoffPolicy::none().delay(&ThreadRngJitter), Duration::ZERO);
    }
}
