//! Group membership for connections hosted on this server.

use crate::hub::connection::HubConnection;
use crate::messaging::topics::normalize_group;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Group name -> locally hosted members. Only connections registered on this
/// server ever appear here.
#[derive(Default)]
pub struct GroupRegistry {
    groups: DashMap<String, HashMap<String, Arc<dyn HubConnection>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a membership; creates the bucket on first join. Re-adding an
    /// existing membership is a no-op.
    pub fn add(&self, connection: Arc<dyn HubConnection>, group_name: &str) {
        let key = normalize_group(group_name);
        self.groups
            .entry(key)
            .or_default()
            .insert(connection.id().to_string(), connection);
    }

    /// Remove a membership; empty buckets are discarded.
    pub fn remove(&self, connection_id: &str, group_name: &str) {
        let key = normalize_group(group_name);
        if let Some(mut members) = self.groups.get_mut(&key) {
            members.remove(connection_id);
            let emptied = members.is_empty();
            drop(members);
            if emptied {
                self.groups.remove_if(&key, |_, m| m.is_empty());
            }
        }
    }

    /// Remove the connection from every group it is in; called on disconnect.
    pub fn remove_disconnected(&self, connection_id: &str) {
        self.groups.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    /// Stable snapshot of one group's local members.
    pub fn snapshot(&self, group_name: &str) -> Vec<Arc<dyn HubConnection>> {
        let key = normalize_group(group_name);
        self.groups
            .get(&key)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection::WriteError;
    use crate::messaging::protocol::InvocationMessage;
    use async_trait::async_trait;

    struct NullConnection {
        id: String,
    }

    #[async_trait]
    impl HubConnection for NullConnection {
        fn id(&self) -> &str {
            &self.id
        }

        fn user_id(&self) -> Option<&str> {
            None
        }

        async fn write(&self, _message: InvocationMessage) -> Result<(), WriteError> {
            Ok(())
        }
    }

    fn conn(id: &str) -> Arc<dyn HubConnection> {
        Arc::new(NullConnection { id: id.to_string() })
    }

    #[test]
    fn membership_is_case_insensitive() {
        let groups = GroupRegistry::new();
        groups.add(conn("c1"), "Chat");
        assert_eq!(groups.snapshot("chat").len(), 1);
        assert_eq!(groups.snapshot("CHAT").len(), 1);

        groups.remove("c1", "cHaT");
        assert!(groups.snapshot("Chat").is_empty());
    }

    #[test]
    fn duplicate_add_is_a_no_op() {
        let groups = GroupRegistry::new();
        groups.add(conn("c1"), "g");
        groups.add(conn("c1"), "g");
        assert_eq!(groups.snapshot("g").len(), 1);
    }

    #[test]
    fn empty_buckets_are_discarded() {
        let groups = GroupRegistry::new();
        groups.add(conn("c1"), "g");
        assert_eq!(groups.group_count(), 1);
        groups.remove("c1", "g");
        assert_eq!(groups.group_count(), 0);
    }

    #[test]
    fn disconnect_clears_every_membership() {
        let groups = GroupRegistry::new();
        groups.add(conn("c1"), "g1");
        groups.add(conn("c1"), "g2");
        groups.add(conn("c2"), "g1");

        groups.remove_disconnected("c1");
        assert_eq!(groups.snapshot("g1").len(), 1);
        assert!(groups.snapshot("g2").is_empty());
        assert_eq!(groups.group_count(), 1);
    }
}
