//! Message shapes exchanged between servers and written to connections.

use crate::messaging::codec::ArgValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// A server-initiated call of a named method on a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationMessage {
    pub invocation_id: u64,
    /// Method name the client dispatches on.
    pub target: String,
    /// Positional arguments, each carrying its own type identity.
    pub arguments: Vec<ArgValue>,
    /// Fan-out invocations never wait for a client result.
    pub non_blocking: bool,
}

impl InvocationMessage {
    pub fn non_blocking(invocation_id: u64, target: impl Into<String>, arguments: Vec<ArgValue>) -> Self {
        Self {
            invocation_id,
            target: target.into(),
            arguments,
            non_blocking: true,
        }
    }
}

/// An invocation plus the connection ids every consuming server must skip.
///
/// Exclusions filter by connection id only, never by user or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludingInvocationMessage {
    #[serde(flatten)]
    pub message: InvocationMessage,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_ids: BTreeSet<String>,
}

impl ExcludingInvocationMessage {
    pub fn new(message: InvocationMessage, excluded_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            message,
            excluded_ids: excluded_ids.into_iter().collect(),
        }
    }

    pub fn without_exclusions(message: InvocationMessage) -> Self {
        Self {
            message,
            excluded_ids: BTreeSet::new(),
        }
    }

    pub fn excludes(&self, connection_id: &str) -> bool {
        self.excluded_ids.contains(connection_id)
    }
}

/// Group-mutation sub-protocol message, published on the control topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub action: GroupAction,
    pub correlation_id: u64,
    pub connection_id: String,
    pub group_name: String,
    /// Server whose private inbox receives the acknowledgement.
    pub origin_server: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupAction {
    Add,
    Remove,
    Ack,
}

impl ControlMessage {
    pub fn add(
        correlation_id: u64,
        connection_id: impl Into<String>,
        group_name: impl Into<String>,
        origin_server: impl Into<String>,
    ) -> Self {
        Self {
            action: GroupAction::Add,
            correlation_id,
            connection_id: connection_id.into(),
            group_name: group_name.into(),
            origin_server: origin_server.into(),
        }
    }

    pub fn remove(
        correlation_id: u64,
        connection_id: impl Into<String>,
        group_name: impl Into<String>,
        origin_server: impl Into<String>,
    ) -> Self {
        Self {
            action: GroupAction::Remove,
            correlation_id,
            connection_id: connection_id.into(),
            group_name: group_name.into(),
            origin_server: origin_server.into(),
        }
    }

    pub fn ack(correlation_id: u64, origin_server: impl Into<String>) -> Self {
        Self {
            action: GroupAction::Ack,
            correlation_id,
            connection_id: String::new(),
            group_name: String::new(),
            origin_server: origin_server.into(),
        }
    }
}

/// Monotonically increasing id source for outbound invocations.
#[derive(Debug, Default)]
pub struct InvocationIdSource {
    next: AtomicU64,
}

impl InvocationIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_ids_are_monotonic() {
        let source = InvocationIdSource::new();
        let first = source.next_id();
        let second = source.next_id();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn exclusion_filters_by_connection_id() {
        let message = InvocationMessage::non_blocking(1, "Echo", vec![]);
        let excluding = ExcludingInvocationMessage::new(message, ["b".to_string()]);
        assert!(excluding.excludes("b"));
        assert!(!excluding.excludes("a"));
    }

    #[test]
    fn empty_exclusions_are_omitted_on_the_wire() {
        let message = InvocationMessage::non_blocking(7, "Ping", vec![]);
        let excluding = ExcludingInvocationMessage::without_exclusions(message);
        let json = serde_json::to_value(&excluding).unwrap();
        assert!(json.get("excluded_ids").is_none());
        assert_eq!(json["target"], "Ping");
    }
}
