//! Jitter strategies to keep retrying workers from stampeding in step.

use rand::Rng;
use std::time::Duration;

/// Randomization applied to a backoff delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Use the exact delay.
    None,
    /// Random in `[0, delay]`.
    Full,
    /// Random in `[delay * (1 - fraction), delay * (1 + fraction)]`.
    PlusMinus { fraction: f64 },
}

impl Jitter {
    pub fn full() -> Self {
        Self::Full
    }

    /// Spread the delay symmetrically by `fraction`, clamped to `[0, 1]`.
    /// `plus_minus(0.5)` yields delays between half and one-and-a-half times
    /// the backoff value.
    pub fn plus_minus(fraction: f64) -> Self {
        Self::PlusMinus { fraction: fraction.clamp(0.0, 1.0) }
    }

    /// Apply jitter to `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rand::rng())
    }

    /// Apply jitter with a caller-supplied RNG, so tests can be seeded.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = delay.as_millis().min(u64::MAX as u128) as u64;
        match self {
            Self::None => delay,
            Self::Full => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Self::PlusMinus { fraction } => {
                if millis == 0 {
                    return Duration::ZERO;
                }
                let spread = (millis as f64 * fraction) as u64;
                let low = millis.saturating_sub(spread);
                let high = millis.saturating_add(spread);
                Duration::from_millis(rng.random_range(low..=high))
            }
        }
    }
}
