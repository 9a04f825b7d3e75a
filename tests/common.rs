//! Common test harness utilities for integration tests.
//!
//! Provides recording connections backed by unbounded channel sinks and a
//! helper for standing up bus-backed managers against one shared in-process
//! broker, so multi-server fleets run inside a single test.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use async_trait::async_trait;
use photon::{
    DistributedHubManager, HubConfig, HubConnection, InProcessBroker, InvocationMessage,
    WriteError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Receiving half of a test connection's outbound sink.
pub type Sink = mpsc::UnboundedReceiver<InvocationMessage>;

pub struct TestConnection {
    id: String,
    user: Option<String>,
    tx: mpsc::UnboundedSender<InvocationMessage>,
}

#[async_trait]
impl HubConnection for TestConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn user_id(&self) -> Option<&str> {
        self.user.as_deref()
    }

    async fn write(&self, message: InvocationMessage) -> Result<(), WriteError> {
        self.tx
            .send(message)
            .map_err(|_| WriteError::new("sink closed"))
    }
}

/// An anonymous connection plus the receiving end of its sink.
pub fn connection(id: &str) -> (Arc<dyn HubConnection>, Sink) {
    build_connection(id, None)
}

/// A connection authenticated as `user`.
pub fn user_connection(id: &str, user: &str) -> (Arc<dyn HubConnection>, Sink) {
    build_connection(id, Some(user.to_string()))
}

fn build_connection(id: &str, user: Option<String>) -> (Arc<dyn HubConnection>, Sink) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(TestConnection {
            id: id.to_string(),
            user,
            tx,
        }),
        rx,
    )
}

/// Stand up one server's manager against the shared broker. The short ack
/// timeout keeps no-owner mutations from stalling the suite.
pub async fn manager(broker: &InProcessBroker, hub: &str) -> DistributedHubManager {
    let bus = Arc::new(broker.adapter());
    let config = HubConfig::new(hub).with_ack_timeout(Duration::from_millis(250));
    DistributedHubManager::new(bus, config)
        .await
        .expect("manager should start against a fresh broker")
}

/// Give spawned bus-handler tasks a chance to run to completion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

/// Drain everything currently buffered in a sink.
pub fn drain(sink: &mut Sink) -> Vec<InvocationMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = sink.try_recv() {
        messages.push(message);
    }
    messages
}
