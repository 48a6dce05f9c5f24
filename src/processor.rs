//! Processor assembly and the receive loop.

use crate::broker::Receiver;
use crate::codec::{Codec, JsonCodec};
use crate::entity::EntityFetcher;
use crate::error::AsyncError;
use crate::handlers::{default_chain, Handler, DEFAULT_RENEWAL_INTERVAL};
use crate::hooks::OperationHook;
use crate::matcher::Matcher;
use crate::retry::RetryPolicy;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::status::StatusStore;
use crate::telemetry::{EventSink, LogSink};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Tuning knobs for the receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Messages processed concurrently.
    pub max_concurrency: usize,
    /// Consecutive receive failures tolerated before the first message has
    /// ever been pulled; exceeding it aborts startup.
    pub start_max_attempts: usize,
    /// How long to wait before polling again when the queue is empty or the
    /// broker errored.
    pub idle_poll_interval: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            start_max_attempts: 5,
            idle_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Rejected processor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("a receiver is required")]
    MissingReceiver,
    #[error("a matcher is required")]
    MissingMatcher,
    #[error("max_concurrency must be > 0")]
    InvalidMaxConcurrency,
}

/// Failure that stops the receive loop.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("receiver failed {attempts} times before the first message")]
    StartFailed {
        attempts: usize,
        #[source]
        source: crate::broker::BrokerError,
    },
}

/// Builder for [`Processor`]. A receiver and a matcher are required; every
/// other collaborator has a default or is optional.
pub struct ProcessorBuilder<S: EventSink = LogSink> {
    receiver: Option<Arc<dyn Receiver>>,
    matcher: Option<Arc<Matcher>>,
    status_store: Option<Arc<dyn StatusStore>>,
    entity_fetcher: Option<Arc<dyn EntityFetcher>>,
    hooks: Vec<Arc<dyn OperationHook>>,
    codec: Arc<dyn Codec>,
    custom_handler: Option<Arc<dyn Handler>>,
    options: ProcessorOptions,
    sink: S,
    lock_renewal_interval: Duration,
    status_retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl ProcessorBuilder<LogSink> {
    pub fn new() -> Self {
        Self {
            receiver: None,
            matcher: None,
            status_store: None,
            entity_fetcher: None,
            hooks: Vec::new(),
            codec: Arc::new(JsonCodec),
            custom_handler: None,
            options: ProcessorOptions::default(),
            sink: LogSink,
            lock_renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            status_retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl Default for ProcessorBuilder<LogSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ProcessorBuilder<S>
where
    S: EventSink + Sync,
    S::Future: Send + 'static,
{
    pub fn receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    pub fn matcher(mut self, matcher: Arc<Matcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Wire in the external status store; without one the status-reporting
    /// layer is dropped from the chain.
    pub fn status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.status_store = Some(store);
        self
    }

    pub fn entity_fetcher(mut self, fetcher: Arc<dyn EntityFetcher>) -> Self {
        self.entity_fetcher = Some(fetcher);
        self
    }

    /// Append a hook; hooks run in registration order.
    pub fn hook(mut self, hook: Arc<dyn OperationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn hooks(mut self, hooks: Vec<Arc<dyn OperationHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the default chain entirely. The matcher is still required.
    pub fn custom_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.custom_handler = Some(handler);
        self
    }

    pub fn options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn lock_renewal_interval(mut self, interval: Duration) -> Self {
        self.lock_renewal_interval = interval;
        self
    }

    /// Retry policy for the status store's `IN_PROGRESS` write.
    pub fn status_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.status_retry = retry;
        self
    }

    /// Sleeper used for idle polling; swapped out in tests.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the QoS event sink.
    pub fn event_sink<S2>(self, sink: S2) -> ProcessorBuilder<S2>
    where
        S2: EventSink + Sync,
        S2::Future: Send + 'static,
    {
        ProcessorBuilder {
            receiver: self.receiver,
            matcher: self.matcher,
            status_store: self.status_store,
            entity_fetcher: self.entity_fetcher,
            hooks: self.hooks,
            codec: self.codec,
            custom_handler: self.custom_handler,
            options: self.options,
            sink,
            lock_renewal_interval: self.lock_renewal_interval,
            status_retry: self.status_retry,
            sleeper: self.sleeper,
        }
    }

    pub fn build(self) -> Result<Processor, BuildError> {
        let receiver = self.receiver.ok_or(BuildError::MissingReceiver)?;
        let matcher = self.matcher.ok_or(BuildError::MissingMatcher)?;
        if self.options.max_concurrency == 0 {
            return Err(BuildError::InvalidMaxConcurrency);
        }

        let handler = match self.custom_handler {
            Some(handler) => handler,
            None => default_chain(
                matcher,
                self.status_store,
                self.entity_fetcher,
                self.hooks,
                self.codec,
                self.sink,
                self.lock_renewal_interval,
                self.status_retry,
            ),
        };

        Ok(Processor {
            receiver,
            handler,
            options: self.options,
            cancellation: CancellationToken::new(),
            sleeper: self.sleeper,
        })
    }
}

/// Pulls messages off the broker and dispatches each to the handler chain,
/// with at most `max_concurrency` in flight.
pub struct Processor {
    receiver: Arc<dyn Receiver>,
    handler: Arc<dyn Handler>,
    options: ProcessorOptions,
    cancellation: CancellationToken,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("options", &self.options)
            .field("cancellation", &self.cancellation)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Processor {
    pub fn builder() -> ProcessorBuilder<LogSink> {
        ProcessorBuilder::new()
    }

    /// Token observed by the receive loop and every in-flight worker.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Stop accepting new messages; `run` drains in-flight work and returns.
    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }

    /// The receive loop. Runs until cancelled, draining in-flight workers
    /// before returning; only repeated receive failures before the very
    /// first message abort it with an error.
    pub async fn run(&self) -> Result<(), ProcessorError> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let mut workers: JoinSet<()> = JoinSet::new();
        let settler = self.receiver.settler();
        let mut started = false;
        let mut start_failures = 0usize;

        loop {
            let permit = tokio::select! {
                _ = self.cancellation.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = self.cancellation.cancelled() => {
                    drop(permit);
                    break;
                }
                received = self.receiver.receive(1) => received,
            };

            let message = match received {
                Ok(mut batch) => {
                    started = true;
                    start_failures = 0;
                    if batch.is_empty() {
                        drop(permit);
                        self.sleeper.sleep(self.options.idle_poll_interval).await;
                        continue;
                    }
                    batch.remove(0)
                }
                Err(e) => {
                    drop(permit);
                    if !started {
                        start_failures += 1;
                        if start_failures >= self.options.start_max_attempts {
                            error!(error = %e, attempts = start_failures, "receiver never started");
                            return Err(ProcessorError::StartFailed {
                                attempts: start_failures,
                                source: e,
                            });
                        }
                    }
                    warn!(error = %e, "receiving from the broker");
                    self.sleeper.sleep(self.options.idle_poll_interval).await;
                    continue;
                }
            };

            // Reap finished workers so panics surface promptly.
            while let Some(joined) = workers.try_join_next() {
                log_worker_exit(joined);
            }

            let handler = Arc::clone(&self.handler);
            let settler = Arc::clone(&settler);
            let token = self.cancellation.clone();
            workers.spawn(async move {
                let _permit = permit;
                let outcome = tokio::select! {
                    outcome = handler.handle(&message, settler.as_ref()) => outcome,
                    _ = token.cancelled() => {
                        Err(AsyncError::retry("processing cancelled during shutdown"))
                    }
                };
                match outcome {
                    Ok(()) => debug!(message_id = %message.message_id, "message processed"),
                    Err(e) => {
                        warn!(message_id = %message.message_id, error = %e, "message processing failed");
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            log_worker_exit(joined);
        }
        Ok(())
    }
}

fn log_worker_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "worker panicked");
        } else if !e.is_cancelled() {
            error!(error = %e, "worker failed to join");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_memory::{InMemoryBroker, SettlementVerb};
    use crate::broker::{
        BrokerClient, BrokerError, Message, ReceivedMessage, Sender, Settler,
    };
    use crate::request::OperationRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CompletingHandler;

    #[async_trait]
    impl Handler for CompletingHandler {
        async fn handle(
            &self,
            message: &ReceivedMessage,
            settler: &dyn Settler,
        ) -> Result<(), AsyncError> {
            settler
                .complete(message)
                .await
                .map_err(|e| AsyncError::other("completing", e))
        }
    }

    struct FailingReceiver;

    #[async_trait]
    impl Receiver for FailingReceiver {
        async fn receive(
            &self,
            _max_messages: usize,
        ) -> Result<Vec<ReceivedMessage>, BrokerError> {
            Err(BrokerError::Transport("connection refused".into()))
        }

        fn settler(&self) -> Arc<dyn Settler> {
            struct NoopSettler;
            #[async_trait]
            impl Settler for NoopSettler {
                async fn complete(&self, _m: &ReceivedMessage) -> Result<(), BrokerError> {
                    Ok(())
                }
                async fn abandon(&self, _m: &ReceivedMessage) -> Result<(), BrokerError> {
                    Ok(())
                }
                async fn dead_letter(&self, _m: &ReceivedMessage) -> Result<(), BrokerError> {
                    Ok(())
                }
                async fn defer(&self, _m: &ReceivedMessage) -> Result<(), BrokerError> {
                    Ok(())
                }
                async fn renew_lock(&self, _m: &ReceivedMessage) -> Result<(), BrokerError> {
                    Ok(())
                }
            }
            Arc::new(NoopSettler)
        }
    }

    async fn send_raw(broker: &InMemoryBroker, message_id: &str) {
        let sender = broker.sender("q").await.unwrap();
        sender
            .send(Message::new(Vec::new()).with_message_id(message_id))
            .await
            .unwrap();
    }

    async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
        let start = Instant::now();
        while !condition() {
            assert!(start.elapsed() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn builder_requires_a_receiver() {
        let err = Processor::builder()
            .matcher(Arc::new(Matcher::new()))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingReceiver);
    }

    #[tokio::test]
    async fn builder_requires_a_matcher() {
        let broker = InMemoryBroker::new();
        let receiver = broker.receiver("q").await.unwrap();
        let err = Processor::builder().receiver(receiver).build().unwrap_err();
        assert_eq!(err, BuildError::MissingMatcher);
    }

    #[tokio::test]
    async fn builder_rejects_zero_concurrency() {
        let broker = InMemoryBroker::new();
        let receiver = broker.receiver("q").await.unwrap();
        let err = Processor::builder()
            .receiver(receiver)
            .matcher(Arc::new(Matcher::new()))
            .options(ProcessorOptions { max_concurrency: 0, ..Default::default() })
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::InvalidMaxConcurrency);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn processes_messages_until_shutdown() {
        let broker = InMemoryBroker::new();
        send_raw(&broker, "m-1").await;
        send_raw(&broker, "m-2").await;

        let processor = Arc::new(
            Processor::builder()
                .receiver(broker.receiver("q").await.unwrap())
                .matcher(Arc::new(Matcher::new()))
                .custom_handler(Arc::new(CompletingHandler))
                .build()
                .unwrap(),
        );

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run().await })
        };

        let broker_view = broker.clone();
        wait_until(Duration::from_secs(5), move || {
            broker_view
                .settlements()
                .iter()
                .filter(|s| s.verb == SettlementVerb::Complete)
                .count()
                == 2
        })
        .await;

        processor.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_stays_within_the_bound() {
        struct TrackingHandler {
            current: AtomicUsize,
            peak: AtomicUsize,
            done: AtomicUsize,
        }

        #[async_trait]
        impl Handler for TrackingHandler {
            async fn handle(
                &self,
                message: &ReceivedMessage,
                settler: &dyn Settler,
            ) -> Result<(), AsyncError> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                self.done.fetch_add(1, Ordering::SeqCst);
                let _ = settler.complete(message).await;
                Ok(())
            }
        }

        let broker = InMemoryBroker::new();
        for i in 0..6 {
            send_raw(&broker, &format!("m-{i}")).await;
        }

        let tracking = Arc::new(TrackingHandler {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });
        let processor = Arc::new(
            Processor::builder()
                .receiver(broker.receiver("q").await.unwrap())
                .matcher(Arc::new(Matcher::new()))
                .custom_handler(Arc::clone(&tracking) as Arc<dyn Handler>)
                .options(ProcessorOptions { max_concurrency: 2, ..Default::default() })
                .build()
                .unwrap(),
        );

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run().await })
        };

        let done = Arc::clone(&tracking);
        wait_until(Duration::from_secs(5), move || {
            done.done.load(Ordering::SeqCst) == 6
        })
        .await;

        processor.shutdown();
        runner.await.unwrap().unwrap();
        assert!(tracking.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn a_panicking_handler_does_not_stop_the_loop() {
        struct PanicOnFirst {
            handled: AtomicUsize,
        }

        #[async_trait]
        impl Handler for PanicOnFirst {
            async fn handle(
                &self,
                message: &ReceivedMessage,
                settler: &dyn Settler,
            ) -> Result<(), AsyncError> {
                if self.handled.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first message bug");
                }
                let _ = settler.complete(message).await;
                Ok(())
            }
        }

        let broker = InMemoryBroker::new();
        send_raw(&broker, "m-1").await;
        send_raw(&broker, "m-2").await;

        let processor = Arc::new(
            Processor::builder()
                .receiver(broker.receiver("q").await.unwrap())
                .matcher(Arc::new(Matcher::new()))
                .custom_handler(Arc::new(PanicOnFirst { handled: AtomicUsize::new(0) }))
                .build()
                .unwrap(),
        );

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run().await })
        };

        let broker_view = broker.clone();
        wait_until(Duration::from_secs(5), move || {
            broker_view.verbs_for("m-2") == vec![SettlementVerb::Complete]
        })
        .await;

        processor.shutdown();
        runner.await.unwrap().unwrap();
        assert!(broker.verbs_for("m-1").is_empty(), "panicked message was not settled");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_drains_in_flight_work() {
        struct SlowHandler {
            started: AtomicUsize,
        }

        #[async_trait]
        impl Handler for SlowHandler {
            async fn handle(
                &self,
                _message: &ReceivedMessage,
                _settler: &dyn Settler,
            ) -> Result<(), AsyncError> {
                self.started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(())
            }
        }

        let broker = InMemoryBroker::new();
        send_raw(&broker, "m-1").await;

        let slow = Arc::new(SlowHandler { started: AtomicUsize::new(0) });
        let processor = Arc::new(
            Processor::builder()
                .receiver(broker.receiver("q").await.unwrap())
                .matcher(Arc::new(Matcher::new()))
                .custom_handler(Arc::clone(&slow) as Arc<dyn Handler>)
                .build()
                .unwrap(),
        );

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run().await })
        };

        let started = Arc::clone(&slow);
        wait_until(Duration::from_secs(5), move || {
            started.started.load(Ordering::SeqCst) == 1
        })
        .await;

        processor.shutdown();
        // The cancelled worker resolves to a retryable error and the loop
        // drains promptly instead of waiting out the 600s sleep.
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("drained in time")
            .unwrap()
            .unwrap();
        assert!(broker.verbs_for("m-1").is_empty());
    }

    #[tokio::test]
    async fn repeated_receive_failures_abort_startup() {
        let processor = Processor::builder()
            .receiver(Arc::new(FailingReceiver))
            .matcher(Arc::new(Matcher::new()))
            .custom_handler(Arc::new(CompletingHandler))
            .sleeper(Arc::new(crate::sleeper::InstantSleeper))
            .build()
            .unwrap();

        let err = processor.run().await.unwrap_err();
        let ProcessorError::StartFailed { attempts, .. } = err;
        assert_eq!(attempts, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn default_chain_runs_registered_operations() {
        let matcher = Arc::new(Matcher::new());

        #[derive(Default)]
        struct InstantOp;
        #[async_trait]
        impl crate::operation::ApiOperation for InstantOp {
            async fn init(
                &mut self,
                _request: OperationRequest,
            ) -> Result<(), AsyncError> {
                Ok(())
            }
            async fn guard_concurrency(
                &mut self,
                _entity: Option<&dyn crate::entity::Entity>,
            ) -> Result<(), AsyncError> {
                Ok(())
            }
            async fn run(&mut self) -> Result<(), AsyncError> {
                Ok(())
            }
            fn request(&self) -> Option<&OperationRequest> {
                None
            }
        }
        matcher.register("LongRunning", InstantOp::default);

        let broker = InMemoryBroker::new();
        let sender = broker.sender("q").await.unwrap();
        let request = OperationRequest::new("LongRunning", "op-1");
        sender
            .send(
                Message::new(JsonCodec.encode(&request).unwrap())
                    .with_message_id("op-1"),
            )
            .await
            .unwrap();

        let processor = Arc::new(
            Processor::builder()
                .receiver(broker.receiver("q").await.unwrap())
                .matcher(matcher)
                .build()
                .unwrap(),
        );

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run().await })
        };

        let broker_view = broker.clone();
        wait_until(Duration::from_secs(5), move || {
            broker_view.verbs_for("op-1") == vec![SettlementVerb::Complete]
        })
        .await;

        processor.shutdown();
        runner.await.unwrap().unwrap();
    }
}
