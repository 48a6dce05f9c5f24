//! Bounded retry with backoff and jitter.
//!
//! Used by the status-store handler for transient store failures and usable
//! by operations for their own downstream calls. The default policy is five
//! attempts with exponential backoff from 100 ms, capped at 10 s, jittered
//! ±50%.

use crate::backoff::Backoff;
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Bounded retry executor.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::new().build().expect("default retry policy is valid")
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    /// On exhaustion the last error is returned.
    pub async fn run<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, E>
    where
        T: Send,
        E: std::fmt::Display + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let delay = self.jitter.apply(self.backoff.delay(attempt));
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed; backing off"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`]. Defaults match the transient-store policy.
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

/// Rejected retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RetryBuildError {
    #[error("max_attempts must be > 0")]
    ZeroAttempts,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::exponential(Duration::from_millis(100)),
            jitter: Jitter::plus_minus(0.5),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, RetryBuildError> {
        if self.max_attempts == 0 {
            return Err(RetryBuildError::ZeroAttempts);
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            sleeper: self.sleeper,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FlakyError(usize);

    impl std::fmt::Display for FlakyError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky failure #{}", self.0)
        }
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let policy = RetryPolicy::builder().sleeper(InstantSleeper).build().unwrap();
        let attempts = AtomicUsize::new(0);

        let result: Result<u32, FlakyError> = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::builder().sleeper(InstantSleeper).build().unwrap();
        let attempts = AtomicUsize::new(0);

        let result: Result<u32, FlakyError> = policy
            .run(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(FlakyError(attempt))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .sleeper(InstantSleeper)
            .build()
            .unwrap();
        let attempts = AtomicUsize::new(0);

        let result: Result<(), FlakyError> = policy
            .run(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(FlakyError(attempt)) }
            })
            .await;

        assert_eq!(result.unwrap_err(), FlakyError(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_curve_is_applied_between_attempts() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_attempts(4)
            .backoff(Backoff::exponential(Duration::from_millis(100)))
            .jitter(Jitter::None)
            .sleeper(sleeper.clone())
            .build()
            .unwrap();

        let _: Result<(), FlakyError> = policy.run(|| async { Err(FlakyError(0)) }).await;

        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ],
            "three sleeps between four attempts"
        );
    }

    #[tokio::test]
    async fn default_policy_matches_the_transient_store_numbers() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);

        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .jitter(Jitter::None)
            .sleeper(sleeper.clone())
            .build()
            .unwrap();
        let _: Result<(), FlakyError> = policy.run(|| async { Err(FlakyError(0)) }).await;

        // 100ms doubling, capped at 10s: four sleeps between five attempts.
        assert_eq!(
            sleeper.calls(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = RetryPolicy::builder().max_attempts(0).build().unwrap_err();
        assert_eq!(err, RetryBuildError::ZeroAttempts);
    }
}
