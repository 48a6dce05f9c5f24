//! Broker-facing interfaces and message shapes.
//!
//! The real queue lives behind these traits; the crate never talks to a
//! broker SDK directly. [`in_memory`] provides a process-local fake for
//! tests.

pub mod in_memory;

use crate::codec::{Codec, CodecError};
use crate::request::OperationRequest;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// A message authored by a producer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// The encoded [`OperationRequest`].
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    /// Producer-chosen id; the broker assigns one when absent.
    pub message_id: Option<String>,
}

impl Message {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, ..Self::default() }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

/// A message as handed to the processing pipeline. The pipeline consumes
/// these fields but never authors them.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub message_id: String,
    /// How many times the broker has delivered this message, starting at 1.
    pub delivery_count: u32,
    /// Token for the exclusive visibility window held on this message.
    pub lock_token: String,
}

/// Failure talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue {0:?} does not exist")]
    UnknownQueue(String),
    #[error("message lock {0:?} is no longer held")]
    LockLost(String),
    #[error("broker transport: {0}")]
    Transport(String),
}

/// Entry point into a broker deployment: hands out per-queue senders and
/// receivers.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn receiver(&self, queue: &str) -> Result<Arc<dyn Receiver>, BrokerError>;
    async fn sender(&self, queue: &str) -> Result<Arc<dyn Sender>, BrokerError>;
}

/// Enqueues messages.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), BrokerError>;
}

/// Pulls messages off a queue.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Receive up to `max_messages`. An empty vec means the queue had
    /// nothing to hand out.
    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// The settlement surface for messages received here.
    fn settler(&self) -> Arc<dyn Settler>;
}

/// Per-message settlement verbs. Settling removes the message from its
/// pending state; `renew_lock` extends the exclusive visibility window
/// while work is still running.
#[async_trait]
pub trait Settler: Send + Sync {
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BrokerError>;
    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), BrokerError>;
    async fn dead_letter(&self, message: &ReceivedMessage) -> Result<(), BrokerError>;
    async fn defer(&self, message: &ReceivedMessage) -> Result<(), BrokerError>;
    async fn renew_lock(&self, message: &ReceivedMessage) -> Result<(), BrokerError>;
}

/// Failure publishing an [`OperationRequest`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Encode `request` and enqueue it with transport metadata populated: the
/// codec's content type and the operation id as correlation id.
pub async fn publish_request(
    sender: &dyn Sender,
    codec: &dyn Codec,
    request: &OperationRequest,
) -> Result<(), PublishError> {
    let body = codec.encode(request)?;
    let message = Message::new(body)
        .with_content_type(codec.content_type())
        .with_correlation_id(request.operation_id.clone());
    sender.send(message).await?;
    Ok(())
}
