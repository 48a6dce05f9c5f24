//! Timing and outcome observability.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::error::AsyncError;
use crate::telemetry::{emit_best_effort, EventSink, QosEvent, QosOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Records start, end, and latency around the inner chain and emits exactly
/// one [`QosEvent`] per message through the sink.
pub struct QosHandler<S> {
    inner: Arc<dyn Handler>,
    sink: S,
}

impl<S> QosHandler<S> {
    pub fn new(inner: Arc<dyn Handler>, sink: S) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl<S> Handler for QosHandler<S>
where
    S: EventSink + Sync,
    S::Future: Send + 'static,
{
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        let start = Instant::now();
        let outcome = self.inner.handle(message, settler).await;
        let latency = start.elapsed();

        let event = QosEvent {
            message_id: message.message_id.clone(),
            delivery_count: message.delivery_count,
            latency,
            outcome: match &outcome {
                Ok(()) => QosOutcome::Succeeded,
                Err(e) => QosOutcome::Failed {
                    error_code: e.error_code,
                    message: e.to_string(),
                },
            },
        };
        emit_best_effort(self.sink.clone(), event).await;

        outcome
    }
}
