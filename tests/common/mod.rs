//! Shared fixtures for the integration suites.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use workbus::{
    ApiOperation, AsyncError, BrokerClient, Codec, Entity, InMemoryBroker, JsonCodec, Matcher,
    Message, OperationRequest, Sender,
};

/// What a scripted operation does at each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)] // each suite uses the scripts it needs
pub enum Script {
    Succeed,
    NonRetryOnInit,
    NonRetryOnRun,
    RetryOnRun,
    RetryOnceThenSucceed,
    PanicOnRun,
    UnclassifiedOnRun,
}

pub struct ScriptedOperation {
    script: Script,
    runs: Arc<AtomicUsize>,
    request: Option<OperationRequest>,
}

#[async_trait]
impl ApiOperation for ScriptedOperation {
    async fn init(&mut self, request: OperationRequest) -> Result<(), AsyncError> {
        self.request = Some(request);
        if self.script == Script::NonRetryOnInit {
            return Err(AsyncError::non_retry("init rejected"));
        }
        Ok(())
    }

    async fn guard_concurrency(&mut self, _entity: Option<&dyn Entity>) -> Result<(), AsyncError> {
        Ok(())
    }

    async fn run(&mut self) -> Result<(), AsyncError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Succeed | Script::NonRetryOnInit => Ok(()),
            Script::NonRetryOnRun => Err(AsyncError::non_retry("run rejected")),
            Script::RetryOnRun => Err(AsyncError::retry("run deferred")),
            Script::RetryOnceThenSucceed => {
                if run == 0 {
                    Err(AsyncError::retry("first run deferred"))
                } else {
                    Ok(())
                }
            }
            Script::PanicOnRun => panic!("scripted operation bug"),
            Script::UnclassifiedOnRun => Err(AsyncError::other(
                "run hit something odd",
                std::io::Error::new(std::io::ErrorKind::Other, "odd"),
            )),
        }
    }

    fn request(&self) -> Option<&OperationRequest> {
        self.request.as_ref()
    }
}

/// Register a scripted operation under `name` and hand back its run counter.
pub fn register_scripted(matcher: &Matcher, name: &str, script: Script) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let captured = Arc::clone(&runs);
    matcher.register(name, move || ScriptedOperation {
        script,
        runs: Arc::clone(&captured),
        request: None,
    });
    runs
}

/// Enqueue a request with its operation id as the broker message id, so
/// settlement assertions can key on it.
#[allow(dead_code)]
pub async fn enqueue(broker: &InMemoryBroker, queue: &str, request: &OperationRequest) {
    let sender = broker.sender(queue).await.expect("sender");
    let body = JsonCodec.encode(request).expect("encode");
    sender
        .send(
            Message::new(body)
                .with_content_type(JsonCodec.content_type())
                .with_correlation_id(request.operation_id.clone())
                .with_message_id(request.operation_id.clone()),
        )
        .await
        .expect("send");
}

/// Spin until `condition` holds or `deadline` passes.
#[allow(dead_code)]
pub async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < deadline,
            "condition not met within {:?}",
            deadline
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
