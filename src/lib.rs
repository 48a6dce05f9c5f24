#![forbid(unsafe_code)]

//! # workbus
//!
//! Runtime library for processing durable asynchronous operations pulled
//! from a message broker queue: at most one operation in flight per target
//! entity, lock renewal for long-running work, lifecycle status reporting to
//! an external store, and principled classification of failures into
//! retryable / non-retryable / unclassified.
//!
//! Callers supply operation implementations keyed by name, an optional
//! entity fetcher, optional hooks, and an optional status-store client. The
//! crate supplies the receive loop, message decoding, dispatch, concurrency
//! guard, status reporting, retry and dead-letter decisions, and structured
//! observability — composed as a chain of handler layers:
//!
//! ```text
//! Panic → LockRenewal → Log → QoS → (Status?) → Classifier → Operation
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use workbus::{
//!     ApiOperation, AsyncError, BrokerClient, Entity, InMemoryBroker, Matcher,
//!     OperationRequest, Processor,
//! };
//!
//! #[derive(Default)]
//! struct LongRunning {
//!     request: Option<OperationRequest>,
//! }
//!
//! #[async_trait::async_trait]
//! impl ApiOperation for LongRunning {
//!     async fn init(&mut self, request: OperationRequest) -> Result<(), AsyncError> {
//!         self.request = Some(request);
//!         Ok(())
//!     }
//!
//!     async fn guard_concurrency(
//!         &mut self,
//!         entity: Option<&dyn Entity>,
//!     ) -> Result<(), AsyncError> {
//!         let request = self.request.as_ref().expect("init ran first");
//!         match entity {
//!             Some(entity) if entity.latest_operation_id() != request.operation_id => {
//!                 Err(AsyncError::non_retry("a newer operation owns this entity"))
//!             }
//!             _ => Ok(()),
//!         }
//!     }
//!
//!     async fn run(&mut self) -> Result<(), AsyncError> {
//!         // the actual work
//!         Ok(())
//!     }
//!
//!     fn request(&self) -> Option<&OperationRequest> {
//!         self.request.as_ref()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let matcher = Arc::new(Matcher::new());
//!     matcher.register("LongRunning", LongRunning::default);
//!
//!     let broker = InMemoryBroker::new();
//!     let processor = Processor::builder()
//!         .receiver(broker.receiver("operations").await?)
//!         .matcher(matcher)
//!         .build()?;
//!     processor.run().await?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod broker;
mod codec;
mod entity;
mod error;
mod handlers;
mod hooks;
mod jitter;
mod matcher;
mod operation;
mod poller;
mod processor;
mod request;
mod retry;
mod sleeper;
mod status;
mod telemetry;

pub use backoff::{Backoff, DEFAULT_BACKOFF_CAP};
pub use broker::in_memory::{InMemoryBroker, Settlement, SettlementVerb};
pub use broker::{
    publish_request, BrokerClient, BrokerError, Message, PublishError, ReceivedMessage, Receiver,
    Sender, Settler,
};
pub use codec::{Codec, CodecError, JsonCodec};
pub use entity::{Entity, EntityFactory, EntityFetcher};
pub use error::{AsyncError, ErrorKind, NonRetryError, RetryError};
pub use handlers::{
    default_chain, ClassifierHandler, Handler, LockRenewalHandler, LogHandler, OperationHandler,
    PanicHandler, QosHandler, StatusHandler, DEFAULT_RENEWAL_INTERVAL,
};
pub use hooks::{HookedOperation, OperationHook};
pub use jitter::Jitter;
pub use matcher::{Matcher, MatcherError};
pub use operation::{ApiOperation, OperationConstructor};
pub use poller::{PollError, Poller};
pub use processor::{BuildError, Processor, ProcessorBuilder, ProcessorError, ProcessorOptions};
pub use request::{ExtensionError, OperationRequest};
pub use retry::{RetryBuildError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use status::{InMemoryStatusStore, OperationStatus, StatusStore, StatusStoreError};
pub use telemetry::{emit_best_effort, EventSink, LogSink, MemorySink, QosEvent, QosOutcome};

pub mod prelude;
