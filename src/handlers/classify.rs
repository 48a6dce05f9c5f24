//! Maps classified errors to broker settlement verbs.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::error::{AsyncError, ErrorKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Inspects the inner outcome and owns the broker verb for failures:
/// non-retryable errors are dead-lettered, retryable errors are abandoned
/// for redelivery, unrecognized errors are left to the visibility timeout.
/// The error is always forwarded upward, never swallowed.
pub struct ClassifierHandler {
    inner: Arc<dyn Handler>,
}

impl ClassifierHandler {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Handler for ClassifierHandler {
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        let outcome = self.inner.handle(message, settler).await;
        let Err(err) = outcome else {
            return Ok(());
        };

        warn!(message_id = %message.message_id, error = %err, "handling failed message");
        match err.kind() {
            ErrorKind::NonRetry(_) => {
                info!(message_id = %message.message_id, "dead-lettering message");
                if let Err(e) = settler.dead_letter(message).await {
                    error!(message_id = %message.message_id, error = %e, "dead-lettering failed");
                    return Err(AsyncError::other("dead-lettering message", e));
                }
            }
            ErrorKind::Retry(_) => {
                info!(message_id = %message.message_id, "abandoning message for redelivery");
                if let Err(e) = settler.abandon(message).await {
                    error!(message_id = %message.message_id, error = %e, "abandoning failed");
                    return Err(AsyncError::other("abandoning message", e));
                }
            }
            ErrorKind::Other(_) => {
                info!(
                    message_id = %message.message_id,
                    "error not recognized; leaving settlement to the broker"
                );
            }
        }

        Err(err)
    }
}
