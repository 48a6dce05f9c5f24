//! Per-message logging context.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::codec::Codec;
use crate::error::AsyncError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

/// Decodes the request once to pull out the correlation fields, then runs
/// the inner chain inside a span carrying them. A body that does not decode
/// is logged and waved through; the operation handler below produces the
/// canonical failure.
pub struct LogHandler {
    inner: Arc<dyn Handler>,
    codec: Arc<dyn Codec>,
}

impl LogHandler {
    pub fn new(inner: Arc<dyn Handler>, codec: Arc<dyn Codec>) -> Self {
        Self { inner, codec }
    }
}

#[async_trait]
impl Handler for LogHandler {
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        let operation_id = match self.codec.decode(&message.body) {
            Ok(request) => request.operation_id,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "message body does not decode");
                String::new()
            }
        };

        let span = info_span!(
            "message",
            message_id = %message.message_id,
            operation_id = %operation_id,
            delivery_count = message.delivery_count,
            correlation_id = message.correlation_id.as_deref().unwrap_or(""),
        );
        self.inner.handle(message, settler).instrument(span).await
    }
}
