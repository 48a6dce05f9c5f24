//! Status reporting around the inner pipeline.
//!
//! Writes `IN_PROGRESS` before the inner handler runs and a terminal status
//! after it returns, so the store sees `IN_PROGRESS` first on every
//! delivery. Transient store failures on the initial write are retried with
//! bounded backoff; if the budget is spent the message fails without a
//! status change and the broker's own redelivery takes over.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::codec::Codec;
use crate::error::{AsyncError, ErrorKind};
use crate::retry::RetryPolicy;
use crate::status::{OperationStatus, StatusStore};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct StatusHandler {
    inner: Arc<dyn Handler>,
    store: Arc<dyn StatusStore>,
    codec: Arc<dyn Codec>,
    retry: RetryPolicy,
}

impl StatusHandler {
    pub fn new(inner: Arc<dyn Handler>, store: Arc<dyn StatusStore>, codec: Arc<dyn Codec>) -> Self {
        Self { inner, store, codec, retry: RetryPolicy::default() }
    }

    /// Replace the bounded-retry policy used for the `IN_PROGRESS` write.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Handler for StatusHandler {
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        // A body that does not decode is the operation handler's canonical
        // failure; skip the status writes and let the inner chain settle it.
        let request = match self.codec.decode(&message.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    message_id = %message.message_id,
                    error = %e,
                    "request does not decode; skipping status reporting"
                );
                return self.inner.handle(message, settler).await;
            }
        };
        let operation_id = request.operation_id;

        let in_progress = self
            .retry
            .run(|| {
                let store = Arc::clone(&self.store);
                let operation_id = operation_id.clone();
                async move {
                    store
                        .update_status(&operation_id, OperationStatus::InProgress)
                        .await
                }
            })
            .await;
        if let Err(e) = in_progress {
            error!(
                operation_id = %operation_id,
                error = %e,
                "setting operation in progress failed; leaving the message to redelivery"
            );
            return Err(AsyncError::other("setting operation in progress", e));
        }

        let outcome = self.inner.handle(message, settler).await;

        let terminal = match &outcome {
            Ok(()) => Some(OperationStatus::Succeeded),
            Err(e) => match e.kind() {
                ErrorKind::NonRetry(_) => Some(OperationStatus::Failed),
                ErrorKind::Retry(_) => Some(OperationStatus::Pending),
                ErrorKind::Other(_) => {
                    info!(
                        operation_id = %operation_id,
                        error = %e,
                        "error not recognized; operation status left unchanged"
                    );
                    None
                }
            },
        };

        if let Some(status) = terminal {
            info!(operation_id = %operation_id, status = %status, "recording terminal status");
            if let Err(e) = self.store.update_status(&operation_id, status).await {
                error!(operation_id = %operation_id, status = %status, error = %e, "terminal status update failed");
                return Err(AsyncError::other(
                    format!("setting operation {status}"),
                    e,
                ));
            }
        }

        outcome
    }
}
