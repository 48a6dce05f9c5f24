//! The layered message-processing pipeline.
//!
//! Each layer wraps the next and returns the outcome upward; no layer
//! silently drops an error. The default chain, outermost first:
//!
//! ```text
//! Panic → LockRenewal → Log → QoS → (Status?) → Classifier → Operation
//! ```
//!
//! The classifier owns the broker verb for failures; the operation handler
//! only ever completes.

mod classify;
mod lock_renewal;
mod log;
mod operation;
mod panic;
mod qos;
mod status;

pub use classify::ClassifierHandler;
pub use lock_renewal::{LockRenewalHandler, DEFAULT_RENEWAL_INTERVAL};
pub use log::LogHandler;
pub use operation::OperationHandler;
pub use panic::PanicHandler;
pub use qos::QosHandler;
pub use status::StatusHandler;

use crate::broker::{ReceivedMessage, Settler};
use crate::codec::Codec;
use crate::entity::EntityFetcher;
use crate::error::AsyncError;
use crate::hooks::OperationHook;
use crate::matcher::Matcher;
use crate::retry::RetryPolicy;
use crate::status::StatusStore;
use crate::telemetry::EventSink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One layer of the processing pipeline.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one received message. Errors signal the layers above;
    /// settlement decisions belong to the classification layer.
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError>;
}

/// Assemble the default chain. `status_store` being absent simply drops the
/// status-reporting layer; everything else keeps its place.
#[allow(clippy::too_many_arguments)]
pub fn default_chain<S>(
    matcher: Arc<Matcher>,
    status_store: Option<Arc<dyn StatusStore>>,
    entity_fetcher: Option<Arc<dyn EntityFetcher>>,
    hooks: Vec<Arc<dyn OperationHook>>,
    codec: Arc<dyn Codec>,
    sink: S,
    lock_renewal_interval: Duration,
    status_retry: RetryPolicy,
) -> Arc<dyn Handler>
where
    S: EventSink + Sync,
    S::Future: Send + 'static,
{
    let mut operation = OperationHandler::new(matcher, Arc::clone(&codec)).with_hooks(hooks);
    if let Some(fetcher) = entity_fetcher {
        operation = operation.with_entity_fetcher(fetcher);
    }

    let classified: Arc<dyn Handler> = Arc::new(ClassifierHandler::new(Arc::new(operation)));

    let reported: Arc<dyn Handler> = match status_store {
        Some(store) => Arc::new(
            StatusHandler::new(classified, store, Arc::clone(&codec))
                .with_retry_policy(status_retry),
        ),
        None => classified,
    };

    let observed = Arc::new(QosHandler::new(reported, sink));
    let logged = Arc::new(LogHandler::new(observed, codec));
    let renewed = Arc::new(LockRenewalHandler::new(logged).with_interval(lock_renewal_interval));
    Arc::new(PanicHandler::new(renewed))
}
