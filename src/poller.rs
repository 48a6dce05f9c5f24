//! Poll a caller-supplied probe until an operation reaches a terminal state.

use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Why polling stopped without the probe reporting done.
#[derive(Debug, Error)]
pub enum PollError<E: std::error::Error + 'static> {
    #[error("probe failed")]
    Probe(#[source] E),
    #[error("still pending after {attempts} attempts")]
    AttemptsExhausted { attempts: usize },
}

/// Drives an async probe on an interval until it reports done. Senders use
/// this to wait for an enqueued operation to reach a terminal status; the
/// probe reads whatever store the deployment records status in.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    max_attempts: Option<usize>,
    sleeper: Arc<dyn Sleeper>,
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self { interval, max_attempts: None, sleeper: Arc::new(TokioSleeper) }
    }

    /// Bound the number of probe attempts; unbounded by default.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Run `probe` until it returns `Ok(true)`. `Ok(false)` waits one
    /// interval and tries again; a probe error stops polling immediately.
    pub async fn wait_until_done<F, Fut, E>(&self, mut probe: F) -> Result<(), PollError<E>>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<bool, E>> + Send,
        E: std::error::Error + Send + 'static,
    {
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            match probe().await {
                Ok(true) => {
                    debug!(attempts, "probe reported done");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => return Err(PollError::Probe(e)),
            }
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Err(PollError::AttemptsExhausted { attempts });
                }
            }
            self.sleeper.sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    #[error("probe broke")]
    struct ProbeBroken;

    #[tokio::test]
    async fn returns_once_the_probe_reports_done() {
        let poller = Poller::new(Duration::from_millis(50)).with_sleeper(InstantSleeper);
        let attempts = AtomicUsize::new(0);

        poller
            .wait_until_done(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<bool, ProbeBroken>(attempt >= 2) }
            })
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sleeps_the_interval_between_probes() {
        let sleeper = TrackingSleeper::new();
        let poller = Poller::new(Duration::from_millis(250)).with_sleeper(sleeper.clone());
        let attempts = AtomicUsize::new(0);

        poller
            .wait_until_done(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<bool, ProbeBroken>(attempt >= 2) }
            })
            .await
            .unwrap();

        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(250), Duration::from_millis(250)]
        );
    }

    #[tokio::test]
    async fn probe_errors_stop_polling() {
        let poller = Poller::new(Duration::from_millis(50)).with_sleeper(InstantSleeper);
        let err = poller
            .wait_until_done(|| async { Err::<bool, _>(ProbeBroken) })
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Probe(ProbeBroken)));
    }

    #[tokio::test]
    async fn attempt_budget_is_enforced() {
        let poller = Poller::new(Duration::from_millis(50))
            .with_sleeper(InstantSleeper)
            .with_max_attempts(4);
        let err = poller
            .wait_until_done(|| async { Ok::<bool, ProbeBroken>(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::AttemptsExhausted { attempts: 4 }));
    }
}
