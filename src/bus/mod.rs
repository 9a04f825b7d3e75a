//! Pub/sub broker abstraction.
//!
//! The distributed manager talks to the broker exclusively through [`Bus`].
//! The contract is deliberately thin: at-least-once publish, per-topic
//! subscribe with a callback, unsubscribe. Handlers may be invoked
//! concurrently from arbitrary worker contexts; subscribers must tolerate
//! that. No retries happen at this layer.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{InProcessBroker, InProcessBus};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked once per payload delivered on a subscribed topic.
pub type MessageHandler = Arc<dyn Fn(String, Bytes) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("bus closed")]
    Closed,
}

/// One server's adapter to the broker.
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Fire-and-forget publish. Completion means the broker accepted the
    /// payload, not that any subscriber saw it.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError>;

    /// Register `handler` for every payload published on `topic`, including
    /// payloads published through this same adapter.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError>;

    /// Tear down this adapter's subscription on `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), BusError>;

    /// Tear down every subscription held by this adapter.
    async fn unsubscribe_all(&self) -> Result<(), BusError>;
}
