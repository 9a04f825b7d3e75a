//! In-process broker for single-node embedding and integration tests.
//!
//! One [`InProcessBroker`] stands in for the external broker; each simulated
//! server connects an [`InProcessBus`] adapter to it. Delivery fans out to
//! every subscribed adapter on the exact topic, including the publisher's
//! own, matching what a real topic broker does.

use crate::bus::{Bus, BusError, MessageHandler};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Cloneable handle to one shared topic table. Clones observe the same
/// broker.
#[derive(Clone, Default)]
pub struct InProcessBroker {
    shared: Arc<BrokerShared>,
}

#[derive(Default)]
struct BrokerShared {
    /// Topic -> (adapter id -> handler).
    topics: DashMap<String, HashMap<u64, MessageHandler>>,
    next_adapter: AtomicU64,
    published: AtomicU64,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new adapter, one per simulated server.
    pub fn adapter(&self) -> InProcessBus {
        let adapter_id = self.shared.next_adapter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(adapter_id, "bus adapter connected");
        InProcessBus {
            broker: self.clone(),
            adapter_id,
            closed: AtomicBool::new(false),
        }
    }

    /// Number of adapters currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .topics
            .get(topic)
            .map_or(0, |handlers| handlers.len())
    }

    /// Total payloads accepted across all adapters.
    pub fn published_count(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    fn dispatch(&self, topic: &str, payload: Bytes) {
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        let handlers: Vec<MessageHandler> = self
            .shared
            .topics
            .get(topic)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        for handler in handlers {
            let topic = topic.to_string();
            let payload = payload.clone();
            tokio::spawn(handler(topic, payload));
        }
    }
}

/// One server's view of the shared broker.
pub struct InProcessBus {
    broker: InProcessBroker,
    adapter_id: u64,
    closed: AtomicBool,
}

impl InProcessBus {
    /// Detach from the broker; subsequent calls fail with [`BusError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(adapter_id = self.adapter_id, "bus adapter disconnected");
            self.drop_subscriptions();
        }
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    fn drop_subscriptions(&self) {
        self.broker.shared.topics.retain(|_, handlers| {
            handlers.remove(&self.adapter_id);
            !handlers.is_empty()
        });
    }
}

#[async_trait]
impl Bus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        self.ensure_open()?;
        self.broker.dispatch(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        self.ensure_open()?;
        self.broker
            .shared
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(self.adapter_id, handler);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        if let Some(mut handlers) = self.broker.shared.topics.get_mut(topic) {
            handlers.remove(&self.adapter_id);
            let emptied = handlers.is_empty();
            drop(handlers);
            if emptied {
                self.broker.shared.topics.remove_if(topic, |_, h| h.is_empty());
            }
        }
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), BusError> {
        self.ensure_open()?;
        self.drop_subscriptions();
        Ok(())
    }
}

impl Drop for InProcessBus {
    fn drop(&mut self) {
        self.close();
    }
}
