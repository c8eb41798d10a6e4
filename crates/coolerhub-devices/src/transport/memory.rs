//! In-process topic exchange.
//!
//! Routes messages by dot-delimited routing keys with topic-exchange
//! semantics: `*` matches exactly one word, `#` matches zero or more words.
//! Slash-dialect topics and patterns are translated on the way in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use coolerhub_core::topic::{TopicDialect, to_dialect};
use coolerhub_core::{InboundMessage, Result, SubscriberTable, Subscription, Transport};
use tracing::{debug, trace};

/// Topic exchange living inside the process.
pub struct MemoryExchange {
    name: String,
    subscribers: SubscriberTable,
    published: AtomicU64,
}

impl MemoryExchange {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            subscribers: SubscriberTable::new(),
            published: AtomicU64::new(0),
        })
    }

    /// Messages published so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Bound patterns, in routing-key form.
    pub fn bindings(&self) -> Vec<String> {
        self.subscribers.patterns()
    }
}

#[async_trait]
impl Transport for MemoryExchange {
    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> TopicDialect {
        TopicDialect::Dot
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        let routing_key = to_dialect(topic, TopicDialect::Dot);
        self.published.fetch_add(1, Ordering::Relaxed);
        let delivered = self
            .subscribers
            .dispatch(&InboundMessage::new(routing_key.as_str(), payload));
        trace!(exchange = %self.name, routing_key = %routing_key, delivered, "routed");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let binding = to_dialect(pattern, TopicDialect::Dot);
        debug!(exchange = %self.name, binding = %binding, "queue bound");
        Ok(self.subscribers.add(&binding))
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        let binding = to_dialect(pattern, TopicDialect::Dot);
        let removed = self.subscribers.remove(&binding);
        debug!(exchange = %self.name, binding = %binding, removed, "queue unbound");
        Ok(())
    }
}
