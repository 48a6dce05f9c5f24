//! Lock renewal while inner work runs.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::error::AsyncError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Default spacing between lock renewals.
pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically extends the broker lock on the current message so operations
/// that outlive the lock duration do not become redeliverable mid-flight.
/// Renewal stops the moment the inner handler returns; renewal errors are
/// logged and never fail the message.
pub struct LockRenewalHandler {
    inner: Arc<dyn Handler>,
    interval: Duration,
}

impl LockRenewalHandler {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner, interval: DEFAULT_RENEWAL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Handler for LockRenewalHandler {
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        let renew = async {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the lock is fresh then.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match settler.renew_lock(message).await {
                    Ok(()) => {
                        debug!(message_id = %message.message_id, "renewed message lock");
                    }
                    Err(e) => {
                        warn!(message_id = %message.message_id, error = %e, "renewing message lock");
                    }
                }
            }
        };

        tokio::select! {
            outcome = self.inner.handle(message, settler) => outcome,
            () = renew => unreachable!("renewal loop never completes"),
        }
    }
}
