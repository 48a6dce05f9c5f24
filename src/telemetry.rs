//! Per-message observability events.
//!
//! The QoS handler emits exactly one [`QosEvent`] per processed message.
//! Events flow through an [`EventSink`], a `tower::Service` so sinks compose
//! with standard tower combinators; emission is best-effort and never blocks
//! or fails the pipeline.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{error, info};

/// One record per processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosEvent {
    pub message_id: String,
    pub delivery_count: u32,
    /// Wall-clock time the full handler chain below QoS took.
    pub latency: Duration,
    pub outcome: QosOutcome,
}

/// How the message left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QosOutcome {
    Succeeded,
    Failed { error_code: u16, message: String },
}

/// A sink consuming [`QosEvent`]s.
///
/// Implemented as a `tower::Service` so sinks can be wrapped, multiplexed,
/// or rate-limited with off-the-shelf combinators.
pub trait EventSink:
    tower::Service<QosEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit that honors `poll_ready` and swallows sink errors. The
/// pipeline hot path must never stall on observability.
pub async fn emit_best_effort<S>(sink: S, event: QosEvent)
where
    S: tower::Service<QosEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready) = sink.ready_oneshot().await {
        let _ = ready.call(event).await;
    }
}

/// Default sink: renders each event as one structured tracing record.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl tower_service::Service<QosEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = std::future::Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QosEvent) -> Self::Future {
        match &event.outcome {
            QosOutcome::Succeeded => info!(
                message_id = %event.message_id,
                delivery_count = event.delivery_count,
                latency_ms = event.latency.as_millis() as u64,
                "message processed"
            ),
            QosOutcome::Failed { error_code, message } => error!(
                message_id = %event.message_id,
                delivery_count = event.delivery_count,
                latency_ms = event.latency.as_millis() as u64,
                error_code,
                error = %message,
                "message processing failed"
            ),
        }
        std::future::ready(Ok(()))
    }
}

impl EventSink for LogSink {
    type SinkError = Infallible;
}

/// Test sink that stores every event.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<QosEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in emission order.
    pub fn events(&self) -> Vec<QosEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl tower_service::Service<QosEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QosEvent) -> Self::Future {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        Box::pin(std::future::ready(Ok(())))
    }
}

impl EventSink for MemorySink {
    type SinkError = Infallible;
}
