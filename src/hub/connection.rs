//! Connection abstraction and the process-local connection index.

use crate::messaging::protocol::InvocationMessage;
use crate::ops::metrics::HubMetrics;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// A single write to a connection's outbound sink failed. Fan-out logs and
/// swallows these; the remaining recipients still get their write.
#[derive(Debug, Error)]
#[error("connection write failed: {reason}")]
pub struct WriteError {
    pub reason: String,
}

impl WriteError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A live client session bound to this server.
///
/// The transport owns the socket and hands the manager this handle. The
/// outbound sink serializes concurrent writes itself; the manager never
/// synchronizes around it.
#[async_trait]
pub trait HubConnection: Send + Sync + 'static {
    /// Stable id, unique fleet-wide. Compared exactly.
    fn id(&self) -> &str;

    /// Authenticated user, if any. Compared exactly.
    fn user_id(&self) -> Option<&str>;

    /// Queue one invocation on the connection's outbound sink.
    async fn write(&self, message: InvocationMessage) -> Result<(), WriteError>;
}

/// Write with the shared failure policy: log, count, carry on.
pub(crate) async fn deliver(
    connection: &Arc<dyn HubConnection>,
    message: InvocationMessage,
    metrics: &HubMetrics,
) {
    if let Err(err) = connection.write(message).await {
        metrics.record_write_failure();
        tracing::warn!(connection_id = connection.id(), error = %err, "dropping invocation for connection");
    }
}

/// Process-local index of live connections by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<dyn HubConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. A colliding id is a caller bug; the newcomer
    /// replaces the old entry rather than corrupting iteration.
    pub fn add(&self, connection: Arc<dyn HubConnection>) {
        self.connections
            .insert(connection.id().to_string(), connection);
    }

    pub fn remove(&self, connection_id: &str) -> Option<Arc<dyn HubConnection>> {
        self.connections
            .remove(connection_id)
            .map(|(_, connection)| connection)
    }

    pub fn lookup(&self, connection_id: &str) -> Option<Arc<dyn HubConnection>> {
        self.connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Stable snapshot for fan-out. Writes are launched only after every
    /// internal lock is released, so iteration cannot deadlock against
    /// concurrent connect/disconnect.
    pub fn snapshot(&self) -> Vec<Arc<dyn HubConnection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
