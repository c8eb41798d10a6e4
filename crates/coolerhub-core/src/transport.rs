//! Transport interface.
//!
//! A transport is a topic-based publish/subscribe collaborator. Adapters
//! accept topics and patterns in either dialect and convert them to their
//! native one; deliveries always carry native topics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::topic::{TopicDialect, topic_matches};

/// A delivered message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Payload as text, for logging.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Publish/subscribe transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Adapter name, used in logs.
    fn name(&self) -> &str;

    /// Native topic dialect.
    fn dialect(&self) -> TopicDialect;

    /// Publish a payload. The topic may be in either dialect.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to a pattern in either dialect.
    ///
    /// Deliveries from one subscription arrive in transport order.
    async fn subscribe(&self, pattern: &str) -> Result<Subscription>;

    /// Drop every subscription registered for `pattern`.
    async fn unsubscribe(&self, pattern: &str) -> Result<()>;

    /// Whether the adapter currently reaches its peers.
    fn is_connected(&self) -> bool {
        true
    }

    /// Release the connection. Later publishes may fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared transport handle.
pub type DynTransport = Arc<dyn Transport>;

/// Fire-and-forget publisher with a single outbound queue.
///
/// One task drains the queue, so publishes leave in submission order.
/// Failures are logged and dropped; retrying belongs to the transport.
/// The task ends once every clone is dropped and the queue is empty.
#[derive(Clone)]
pub struct Outbox {
    transport: DynTransport,
    tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl Outbox {
    /// Start the publisher task for `transport`.
    pub fn spawn(transport: DynTransport) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let publisher = transport.clone();
        let task = tokio::spawn(async move {
            while let Some((topic, payload)) = rx.recv().await {
                if let Err(e) = publisher.publish(&topic, payload).await {
                    tracing::warn!(
                        transport = publisher.name(),
                        topic = %topic,
                        error = %e,
                        "publish failed"
                    );
                }
            }
            tracing::debug!(transport = publisher.name(), "outbox drained");
        });
        (Self { transport, tx }, task)
    }

    /// Queue a publish.
    pub fn publish(&self, topic: impl Into<String>, payload: Vec<u8>) {
        let topic = topic.into();
        if self.tx.send((topic, payload)).is_err() {
            tracing::warn!(transport = self.transport.name(), "outbox closed, publish dropped");
        }
    }

    pub fn transport(&self) -> &DynTransport {
        &self.transport
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl Subscription {
    pub fn new(pattern: impl Into<String>, rx: mpsc::UnboundedReceiver<InboundMessage>) -> Self {
        Self {
            pattern: pattern.into(),
            rx,
        }
    }

    /// Pattern in the transport's native dialect.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next delivery, or `None` once unsubscribed or the transport is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

struct Entry {
    pattern: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

/// Pattern-matched fan-out shared by the transport adapters.
#[derive(Default)]
pub struct SubscriberTable {
    entries: Mutex<Vec<Entry>>,
}

impl SubscriberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native-dialect pattern.
    pub fn add(&self, pattern: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.lock().push(Entry {
            pattern: pattern.to_string(),
            tx,
        });
        Subscription::new(pattern, rx)
    }

    /// Remove every entry for `pattern`. Returns how many were removed.
    pub fn remove(&self, pattern: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.pattern != pattern);
        before - entries.len()
    }

    /// Deliver to every matching subscriber. Returns the number of deliveries.
    ///
    /// Entries whose receiver was dropped are pruned.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let mut delivered = 0;
        self.entries.lock().retain(|entry| {
            if !topic_matches(&entry.pattern, &message.topic) {
                return !entry.tx.is_closed();
            }
            match entry.tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// Whether any live subscriber is registered for `pattern`.
    pub fn contains(&self, pattern: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.pattern == pattern && !e.tx.is_closed())
    }

    pub fn patterns(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.pattern.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
