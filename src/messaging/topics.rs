//! Topic naming for one hub's traffic on the bus.
//!
//! Every topic is prefixed by the hub identity so fleets can share a broker
//! across hubs without cross-talk.

/// Group names compare case-insensitively everywhere; the normalized form is
/// what group buckets and group topics are keyed by. Connection and user ids
/// are exact.
pub fn normalize_group(group_name: &str) -> String {
    group_name.to_lowercase()
}

/// Topic scheme for a single hub.
#[derive(Debug, Clone)]
pub struct HubTopics {
    prefix: String,
}

impl HubTopics {
    pub fn new(hub_name: impl Into<String>) -> Self {
        Self {
            prefix: hub_name.into(),
        }
    }

    /// Broadcast to every connection in the fleet.
    pub fn broadcast(&self) -> String {
        self.prefix.clone()
    }

    /// Broadcast carrying connection-id exclusions.
    pub fn broadcast_except(&self) -> String {
        format!("{}.AllExcept", self.prefix)
    }

    /// Exactly one connection, wherever it lives.
    pub fn connection(&self, connection_id: &str) -> String {
        format!("{}.{}", self.prefix, connection_id)
    }

    /// Every current member of a group.
    pub fn group(&self, group_name: &str) -> String {
        format!("{}.group.{}", self.prefix, normalize_group(group_name))
    }

    /// Every connection authenticated as one user.
    pub fn user(&self, user_id: &str) -> String {
        format!("{}.user.{}", self.prefix, user_id)
    }

    /// Control inbox shared by all servers; carries group mutations.
    pub fn group_control(&self) -> String {
        format!("{}.internal.group", self.prefix)
    }

    /// One server's private inbox; carries acknowledgements.
    pub fn server_inbox(&self, server_id: &str) -> String {
        format!("{}.internal.{}", self.prefix, server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_shapes() {
        let topics = HubTopics::new("app.ChatHub");
        assert_eq!(topics.broadcast(), "app.ChatHub");
        assert_eq!(topics.broadcast_except(), "app.ChatHub.AllExcept");
        assert_eq!(topics.connection("c1"), "app.ChatHub.c1");
        assert_eq!(topics.group("Room"), "app.ChatHub.group.room");
        assert_eq!(topics.user("Alice"), "app.ChatHub.user.Alice");
        assert_eq!(topics.group_control(), "app.ChatHub.internal.group");
        assert_eq!(topics.server_inbox("s1"), "app.ChatHub.internal.s1");
    }

    #[test]
    fn group_topics_are_case_insensitive_but_user_topics_are_not() {
        let topics = HubTopics::new("hub");
        assert_eq!(topics.group("Chat"), topics.group("chat"));
        assert_ne!(topics.user("Alice"), topics.user("alice"));
    }
}
