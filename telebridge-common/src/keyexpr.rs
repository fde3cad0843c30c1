//! Key expressions of the client command/event channel.
//!
//! ```text
//! <prefix>/clients/<client_id>/cmd             client -> bridge commands
//! <prefix>/clients/<client_id>/events/<kind>   bridge -> client events
//! <prefix>/@/clients/<client_id>/alive         client liveliness token
//! <prefix>/@/status                            bridge status
//! <prefix>/@/alive                             bridge liveliness token
//! ```

/// Root of all telebridge key expressions.
pub const KEY_PREFIX: &str = "telebridge";

/// Default prefix of the device bridge.
pub const DEFAULT_DEVICE_PREFIX: &str = "telebridge/device";

/// Builder for the key expressions under one bridge prefix.
#[derive(Debug, Clone)]
pub struct ClientKeys {
    prefix: String,
}

impl ClientKeys {
    /// Create a builder for the given bridge prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key a client publishes its commands on.
    ///
    /// # Example
    /// ```
    /// use telebridge_common::keyexpr::ClientKeys;
    ///
    /// let keys = ClientKeys::new("telebridge/device");
    /// assert_eq!(keys.command_key("c1"), "telebridge/device/clients/c1/cmd");
    /// ```
    pub fn command_key(&self, client_id: &str) -> String {
        format!("{}/clients/{}/cmd", self.prefix, client_id)
    }

    /// Key an event of the given kind is published on.
    ///
    /// # Example
    /// ```
    /// use telebridge_common::keyexpr::ClientKeys;
    ///
    /// let keys = ClientKeys::new("telebridge/device");
    /// assert_eq!(
    ///     keys.event_key("c1", "log-chunk"),
    ///     "telebridge/device/clients/c1/events/log-chunk"
    /// );
    /// ```
    pub fn event_key(&self, client_id: &str, kind: &str) -> String {
        format!("{}/clients/{}/events/{}", self.prefix, client_id, kind)
    }

    /// Wildcard a client subscribes to for all of its events.
    pub fn client_events_wildcard(&self, client_id: &str) -> String {
        format!("{}/clients/{}/events/*", self.prefix, client_id)
    }

    /// Wildcard the bridge subscribes to for commands of every client.
    pub fn all_commands_wildcard(&self) -> String {
        format!("{}/clients/*/cmd", self.prefix)
    }

    /// Liveliness token a client declares while connected.
    pub fn presence_key(&self, client_id: &str) -> String {
        format!("{}/@/clients/{}/alive", self.prefix, client_id)
    }

    /// Wildcard over every client's liveliness token.
    pub fn all_presence_wildcard(&self) -> String {
        format!("{}/@/clients/*/alive", self.prefix)
    }

    /// Bridge status key.
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Bridge liveliness token key.
    pub fn bridge_alive_key(&self) -> String {
        format!("{}/@/alive", self.prefix)
    }

    /// Extract the client id from a command or presence key.
    ///
    /// Returns `None` for keys outside this prefix or with a different shape.
    pub fn parse_client_id<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        let id = match parts.as_slice() {
            ["clients", id, "cmd"] => *id,
            ["@", "clients", id, "alive"] => *id,
            _ => return None,
        };

        if id.is_empty() || id.contains(['*', '$', '#', '?']) {
            return None;
        }
        Some(id)
    }
}

impl Default for ClientKeys {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = ClientKeys::new("telebridge/device/");

        assert_eq!(keys.prefix(), "telebridge/device");
        assert_eq!(
            keys.all_commands_wildcard(),
            "telebridge/device/clients/*/cmd"
        );
        assert_eq!(
            keys.presence_key("ui-7"),
            "telebridge/device/@/clients/ui-7/alive"
        );
        assert_eq!(
            keys.client_events_wildcard("ui-7"),
            "telebridge/device/clients/ui-7/events/*"
        );
        assert_eq!(keys.status_key(), "telebridge/device/@/status");
        assert_eq!(keys.bridge_alive_key(), "telebridge/device/@/alive");
    }

    #[test]
    fn test_parse_client_id() {
        let keys = ClientKeys::default();

        assert_eq!(
            keys.parse_client_id("telebridge/device/clients/ui-7/cmd"),
            Some("ui-7")
        );
        assert_eq!(
            keys.parse_client_id("telebridge/device/@/clients/ui-7/alive"),
            Some("ui-7")
        );
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        let keys = ClientKeys::default();

        assert!(keys.parse_client_id("telebridge/other/clients/a/cmd").is_none());
        assert!(keys.parse_client_id("telebridge/device/clients/a/events/x").is_none());
        assert!(keys.parse_client_id("telebridge/device/clients/*/cmd").is_none());
        assert!(keys.parse_client_id("telebridge/deviceX/clients/a/cmd").is_none());
    }
}
