//! Single-process lifetime manager.
//!
//! Fan-out walks the in-memory connection table once; group membership lives
//! entirely in the local group registry. No bus, no cross-server protocol.

use crate::core::error::{require_non_empty, HubError};
use crate::hub::connection::{deliver, ConnectionRegistry, HubConnection};
use crate::hub::groups::GroupRegistry;
use crate::hub::manager::HubLifetimeManager;
use crate::messaging::codec::ArgValue;
use crate::messaging::protocol::{InvocationIdSource, InvocationMessage};
use crate::ops::metrics::{HubMetrics, MetricsSnapshot};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
pub struct LocalHubManager {
    connections: ConnectionRegistry,
    groups: GroupRegistry,
    invocation_ids: InvocationIdSource,
    metrics: Arc<HubMetrics>,
}

impl LocalHubManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn next_message(&self, method: &str, args: Vec<ArgValue>) -> InvocationMessage {
        InvocationMessage::non_blocking(self.invocation_ids.next_id(), method, args)
    }

    async fn fan_out(
        &self,
        recipients: Vec<Arc<dyn HubConnection>>,
        message: InvocationMessage,
        excluded_ids: &[String],
    ) {
        let excluded: HashSet<&str> = excluded_ids.iter().map(String::as_str).collect();
        for connection in recipients {
            if excluded.contains(connection.id()) {
                continue;
            }
            deliver(&connection, message.clone(), &self.metrics).await;
        }
    }
}

#[async_trait]
impl HubLifetimeManager for LocalHubManager {
    async fn on_connected(&self, connection: Arc<dyn HubConnection>) -> Result<(), HubError> {
        self.connections.add(connection);
        Ok(())
    }

    async fn on_disconnected(&self, connection: Arc<dyn HubConnection>) -> Result<(), HubError> {
        self.connections.remove(connection.id());
        self.groups.remove_disconnected(connection.id());
        Ok(())
    }

    async fn invoke_all(&self, method: &str, args: Vec<ArgValue>) -> Result<(), HubError> {
        let message = self.next_message(method, args);
        self.fan_out(self.connections.snapshot(), message, &[]).await;
        Ok(())
    }

    async fn invoke_all_except(
        &self,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> Result<(), HubError> {
        let message = self.next_message(method, args);
        self.fan_out(self.connections.snapshot(), message, excluded_ids)
            .await;
        Ok(())
    }

    async fn invoke_connection(
        &self,
        connection_id: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError> {
        require_non_empty(connection_id, "connection id")?;
        // Unknown id: silent no-op, indistinguishable from a dropped write.
        if let Some(connection) = self.connections.lookup(connection_id) {
            let message = self.next_message(method, args);
            deliver(&connection, message, &self.metrics).await;
        }
        Ok(())
    }

    async fn invoke_group(
        &self,
        group_name: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError> {
        require_non_empty(group_name, "group name")?;
        let message = self.next_message(method, args);
        self.fan_out(self.groups.snapshot(group_name), message, &[])
            .await;
        Ok(())
    }

    async fn invoke_group_except(
        &self,
        group_name: &str,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> Result<(), HubError> {
        require_non_empty(group_name, "group name")?;
        let message = self.next_message(method, args);
        self.fan_out(self.groups.snapshot(group_name), message, excluded_ids)
            .await;
        Ok(())
    }

    async fn invoke_user(
        &self,
        user_id: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError> {
        require_non_empty(user_id, "user id")?;
        let message = self.next_message(method, args);
        let recipients = self
            .connections
            .snapshot()
            .into_iter()
            .filter(|c| c.user_id() == Some(user_id))
            .collect();
        self.fan_out(recipients, message, &[]).await;
        Ok(())
    }

    async fn add_to_group(&self, connection_id: &str, group_name: &str) -> Result<(), HubError> {
        require_non_empty(connection_id, "connection id")?;
        require_non_empty(group_name, "group name")?;
        // A connection this server does not host is a no-op here.
        if let Some(connection) = self.connections.lookup(connection_id) {
            self.groups.add(connection, group_name);
        }
        Ok(())
    }

    async fn remove_from_group(
        &self,
        connection_id: &str,
        group_name: &str,
    ) -> Result<(), HubError> {
        require_non_empty(connection_id, "connection id")?;
        require_non_empty(group_name, "group name")?;
        self.groups.remove(connection_id, group_name);
        Ok(())
    }
}
