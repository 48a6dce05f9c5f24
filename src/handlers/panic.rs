//! Outermost panic recovery.

use super::Handler;
use crate::broker::{ReceivedMessage, Settler};
use crate::error::AsyncError;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// Recovers panics from anywhere in the chain below. A recovered panic is
/// logged and converted into a retry-classified error; no settlement action
/// is taken here, so the lock expires and the broker redelivers.
pub struct PanicHandler {
    inner: Arc<dyn Handler>,
}

impl PanicHandler {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[async_trait]
impl Handler for PanicHandler {
    async fn handle(
        &self,
        message: &ReceivedMessage,
        settler: &dyn Settler,
    ) -> Result<(), AsyncError> {
        match AssertUnwindSafe(self.inner.handle(message, settler))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let detail = panic_detail(payload.as_ref());
                error!(
                    message_id = %message.message_id,
                    panic = %detail,
                    "handler panicked; leaving the message to redelivery"
                );
                Err(AsyncError::retry("handler panicked")
                    .with_context(format!("recovered panic: {detail}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_memory::InMemoryBroker;
    use crate::broker::{BrokerClient, Message, Receiver};

    struct PanickingInner;

    #[async_trait]
    impl Handler for PanickingInner {
        async fn handle(
            &self,
            _message: &ReceivedMessage,
            _settler: &dyn Settler,
        ) -> Result<(), AsyncError> {
            panic!("operation bug");
        }
    }

    struct HealthyInner;

    #[async_trait]
    impl Handler for HealthyInner {
        async fn handle(
            &self,
            _message: &ReceivedMessage,
            _settler: &dyn Settler,
        ) -> Result<(), AsyncError> {
            Ok(())
        }
    }

    async fn delivered(broker: &InMemoryBroker) -> (ReceivedMessage, Arc<dyn Settler>) {
        let sender = broker.sender("q").await.unwrap();
        sender
            .send(Message::new(Vec::new()).with_message_id("m-1"))
            .await
            .unwrap();
        let receiver = broker.receiver("q").await.unwrap();
        (receiver.receive(1).await.unwrap().remove(0), receiver.settler())
    }

    #[tokio::test]
    async fn recovers_a_panic_into_a_retryable_error() {
        let broker = InMemoryBroker::new();
        let (message, settler) = delivered(&broker).await;
        let handler = PanicHandler::new(Arc::new(PanickingInner));

        let err = handler.handle(&message, settler.as_ref()).await.unwrap_err();
        assert!(err.is_retry());
        assert!(err.message.contains("operation bug"));
        assert!(broker.settlements().is_empty(), "no settlement on panic");
    }

    #[tokio::test]
    async fn healthy_chains_pass_through() {
        let broker = InMemoryBroker::new();
        let (message, settler) = delivered(&broker).await;
        let handler = PanicHandler::new(Arc::new(HealthyInner));
        handler.handle(&message, settler.as_ref()).await.unwrap();
    }
}
