use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod frame;
pub mod udp;

pub use udp::{participant_port, UdpDomainBus, MAX_DOMAIN_ID, PARTICIPANT_SLOTS};

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
    #[error("domain id {0} is outside 0..=232")]
    InvalidDomain(u32),
    #[error("no free participant slot in domain {domain}")]
    NoFreeSlot { domain: u16 },
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;

    /// Releases the participant. Outstanding receivers observe `Closed`.
    fn close(&self) {}
}

/// Per-topic fan-out shared by the bus implementations.
#[derive(Debug, Default)]
pub(crate) struct TopicTable {
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl TopicTable {
    pub(crate) fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Hands a message to current subscribers; returns how many received it.
    pub(crate) fn deliver(&self, message: BusMessage) -> usize {
        let sender = self.topics.read().get(&message.topic).cloned();
        match sender {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub(crate) fn clear(&self) {
        self.topics.write().clear();
    }
}

/// Receiver whose sender is already gone, handed out after a bus is closed.
pub(crate) fn closed_receiver() -> broadcast::Receiver<BusMessage> {
    let (_, rx) = broadcast::channel(1);
    rx
}

/// Simple in-memory bus for tests and single-process setups. Every clone of
/// the `Arc` behaves like a participant on the same domain.
#[derive(Debug, Default)]
pub struct LocalBus {
    table: TopicTable,
    closed: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        if self.is_closed() {
            return closed_receiver();
        }
        self.table.sender_for(topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        // A message nobody listens to is not an error on a pub/sub bus.
        self.table.deliver(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.table.clear();
    }
}
