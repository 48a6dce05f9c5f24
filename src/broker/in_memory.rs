//! Process-local broker fake backed by a mutex-guarded queue.
//!
//! Converts [`Message`] into [`ReceivedMessage`] by copying every
//! transport-visible field, and records settlement verbs and lock renewals
//! so tests can assert on broker behavior.

use super::{BrokerClient, BrokerError, Message, Receiver, ReceivedMessage, Sender, Settler};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Which settlement verb fired for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementVerb {
    Complete,
    Abandon,
    DeadLetter,
    Defer,
}

/// One recorded settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub message_id: String,
    pub verb: SettlementVerb,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Message>>,
    delivery_counts: HashMap<String, u32>,
    settlements: Vec<Settlement>,
    dead_letters: Vec<ReceivedMessage>,
    renewals: HashMap<String, usize>,
}

/// In-memory broker. Queues are created on first use; cloning shares the
/// underlying state so producers, consumers, and test assertions all see the
/// same queue.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every settlement recorded so far, in order.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.lock().settlements.clone()
    }

    /// Settlement verbs recorded for one message, in order.
    pub fn verbs_for(&self, message_id: &str) -> Vec<SettlementVerb> {
        self.lock()
            .settlements
            .iter()
            .filter(|s| s.message_id == message_id)
            .map(|s| s.verb)
            .collect()
    }

    /// Messages set aside permanently.
    pub fn dead_letters(&self) -> Vec<ReceivedMessage> {
        self.lock().dead_letters.clone()
    }

    /// How many times the lock for `message_id` was renewed.
    pub fn renewals(&self, message_id: &str) -> usize {
        self.lock().renewals.get(message_id).copied().unwrap_or(0)
    }

    /// Messages currently waiting in `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn receiver(&self, queue: &str) -> Result<Arc<dyn Receiver>, BrokerError> {
        Ok(Arc::new(InMemoryReceiver {
            queue: queue.to_owned(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn sender(&self, queue: &str) -> Result<Arc<dyn Sender>, BrokerError> {
        Ok(Arc::new(InMemorySender {
            queue: queue.to_owned(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct InMemorySender {
    queue: String,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Sender for InMemorySender {
    async fn send(&self, message: Message) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.queues.entry(self.queue.clone()).or_default().push_back(message);
        Ok(())
    }
}

struct InMemoryReceiver {
    queue: String,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Receiver for InMemoryReceiver {
    async fn receive(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut received = Vec::new();
        for _ in 0..max_messages {
            let Some(message) = state.queues.entry(self.queue.clone()).or_default().pop_front()
            else {
                break;
            };
            let message_id = message
                .message_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let delivery_count = {
                let count = state.delivery_counts.entry(message_id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            received.push(ReceivedMessage {
                body: message.body,
                content_type: message.content_type,
                correlation_id: message.correlation_id,
                message_id,
                delivery_count,
                lock_token: Uuid::new_v4().to_string(),
            });
        }
        Ok(received)
    }

    fn settler(&self) -> Arc<dyn Settler> {
        Arc::new(InMemorySettler {
            queue: self.queue.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

struct InMemorySettler {
    queue: String,
    state: Arc<Mutex<BrokerState>>,
}

impl InMemorySettler {
    fn record(&self, message_id: &str, verb: SettlementVerb) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.settlements.push(Settlement { message_id: message_id.to_owned(), verb });
    }
}

#[async_trait]
impl Settler for InMemorySettler {
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        self.record(&message.message_id, SettlementVerb::Complete);
        Ok(())
    }

    /// Puts the message back at the head of the queue; the next receive
    /// redelivers it with a bumped delivery count.
    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        self.record(&message.message_id, SettlementVerb::Abandon);
        let redelivery = Message {
            body: message.body.clone(),
            content_type: message.content_type.clone(),
            correlation_id: message.correlation_id.clone(),
            message_id: Some(message.message_id.clone()),
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.queues.entry(self.queue.clone()).or_default().push_front(redelivery);
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        self.record(&message.message_id, SettlementVerb::DeadLetter);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.dead_letters.push(message.clone());
        Ok(())
    }

    async fn defer(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        self.record(&message.message_id, SettlementVerb::Defer);
        Ok(())
    }

    async fn renew_lock(&self, message: &ReceivedMessage) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state.renewals.entry(message.message_id.clone()).or_insert(0) += 1;
        Ok(())
    }
}
