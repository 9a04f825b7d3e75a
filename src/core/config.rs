use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

fn default_ack_timeout_ms() -> u64 {
    30_000
}

/// Top-level configuration for one hub's lifetime manager.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Hub identity; prefixes every topic this hub publishes or subscribes on
    /// the bus. Must be stable across all servers of the fleet.
    pub hub_name: String,
    /// How long a cross-server group mutation waits for its acknowledgement
    /// before completing anyway.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Stable server identity override. Generated per process when absent.
    #[serde(default)]
    pub server_id: Option<String>,
}

impl HubConfig {
    pub fn new(hub_name: impl Into<String>) -> Self {
        Self {
            hub_name: hub_name.into(),
            ack_timeout_ms: default_ack_timeout_ms(),
            server_id: None,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_server_id(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hub_name.is_empty() {
            bail!("hub_name must not be empty");
        }
        if self.hub_name.chars().any(char::is_whitespace) {
            bail!("hub_name must not contain whitespace");
        }
        if self.ack_timeout_ms == 0 {
            bail!("ack_timeout_ms must be positive");
        }
        if let Some(id) = &self.server_id {
            if id.is_empty() {
                bail!("server_id override must not be empty");
            }
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = HubConfig::new("chat");
        assert!(config.validate().is_ok());
        assert_eq!(config.ack_timeout(), Duration::from_secs(30));
        assert!(config.server_id.is_none());
    }

    #[test]
    fn rejects_empty_hub_name() {
        assert!(HubConfig::new("").validate().is_err());
    }

    #[test]
    fn rejects_whitespace_hub_name() {
        assert!(HubConfig::new("chat hub").validate().is_err());
    }

    #[test]
    fn rejects_zero_ack_timeout() {
        let config = HubConfig::new("chat").with_ack_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: HubConfig = serde_json::from_str(r#"{"hub_name":"chat"}"#).unwrap();
        assert_eq!(config.hub_name, "chat");
        assert_eq!(config.ack_timeout_ms, 30_000);
    }
}
