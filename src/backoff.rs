//! Delay curves between retry attempts.

use std::time::Duration;

/// Delay applied before each retry attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every attempt.
    Fixed { delay: Duration },
    /// `base * factor^(attempt-1)`, capped at `max`.
    Exponential {
        base: Duration,
        factor: u32,
        max: Duration,
    },
}

/// Default cap for exponential growth.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Doubling backoff from `base`, capped at [`DEFAULT_BACKOFF_CAP`].
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential { base, factor: 2, max: DEFAULT_BACKOFF_CAP }
    }

    pub fn with_factor(mut self, new_factor: u32) -> Self {
        if let Self::Exponential { ref mut factor, .. } = self {
            *factor = new_factor;
        }
        self
    }

    pub fn with_max(mut self, new_max: Duration) -> Self {
        if let Self::Exponential { ref mut max, .. } = self {
            *max = new_max;
        }
        self
    }

    /// Delay before the given attempt, 1-indexed. Growth saturates instead
    /// of overflowing.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { base, factor, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = factor.saturating_pow(exponent);
                let grown = base
                    .checked_mul(multiplier)
                    .unwrap_or(Duration::from_secs(u64::MAX));
                grown.min(*max)
            }
        }
    }
}
