//! The abstract lifetime-manager contract.

use crate::core::error::HubError;
use crate::hub::connection::HubConnection;
use crate::messaging::codec::ArgValue;
use async_trait::async_trait;
use std::sync::Arc;

/// Routes server-initiated invocations to sets of connected clients and
/// tracks connection and group lifetime.
///
/// Both implementations honor the same semantics; the distributed one fans
/// out across the fleet through the bus. Every operation completes when local
/// delivery and any broker publish have been issued, not when remote delivery
/// is observed. None of them retries, and none surfaces per-connection write
/// failures.
#[async_trait]
pub trait HubLifetimeManager: Send + Sync {
    /// Register a freshly handshaken connection.
    async fn on_connected(&self, connection: Arc<dyn HubConnection>) -> Result<(), HubError>;

    /// Deregister a closing connection and drop all of its state. Group
    /// removal here never generates cross-server traffic.
    async fn on_disconnected(&self, connection: Arc<dyn HubConnection>) -> Result<(), HubError>;

    /// Invoke `method` on every connection in the fleet.
    async fn invoke_all(&self, method: &str, args: Vec<ArgValue>) -> Result<(), HubError>;

    /// As [`invoke_all`](Self::invoke_all), skipping the listed connection ids.
    async fn invoke_all_except(
        &self,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> Result<(), HubError>;

    /// Invoke `method` on exactly one connection. Unknown ids are dropped
    /// silently; the caller cannot tell them apart from a silent drop.
    async fn invoke_connection(
        &self,
        connection_id: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError>;

    /// Invoke `method` on every current member of a group.
    async fn invoke_group(
        &self,
        group_name: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError>;

    /// As [`invoke_group`](Self::invoke_group), skipping the listed connection ids.
    async fn invoke_group_except(
        &self,
        group_name: &str,
        method: &str,
        args: Vec<ArgValue>,
        excluded_ids: &[String],
    ) -> Result<(), HubError>;

    /// Invoke `method` on every connection authenticated as `user_id`
    /// (exact match).
    async fn invoke_user(
        &self,
        user_id: &str,
        method: &str,
        args: Vec<ArgValue>,
    ) -> Result<(), HubError>;

    /// Add a connection to a group, wherever the connection lives.
    async fn add_to_group(&self, connection_id: &str, group_name: &str) -> Result<(), HubError>;

    /// Remove a connection from a group, wherever the connection lives.
    async fn remove_from_group(
        &self,
        connection_id: &str,
        group_name: &str,
    ) -> Result<(), HubError>;
}
