//! Event publisher for Zenoh.

use std::sync::Arc;

use telebridge_common::{BridgeEvent, ClientKeys, Format, encode};

use crate::error::{BridgeError, Result};

/// Publisher for sending events to clients over Zenoh.
///
/// Wraps a Zenoh session and publishes [`BridgeEvent`]s on the per-client
/// event keys with automatic serialization.
#[derive(Clone, Debug)]
pub struct Publisher {
    session: Arc<zenoh::Session>,
    keys: ClientKeys,
    format: Format,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(session: Arc<zenoh::Session>, key_prefix: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            keys: ClientKeys::new(key_prefix),
            format,
        }
    }

    /// Get the key prefix.
    pub fn key_prefix(&self) -> &str {
        self.keys.prefix()
    }

    /// Key expressions under this publisher's prefix.
    pub fn keys(&self) -> &ClientKeys {
        &self.keys
    }

    /// Get the serialization format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Get a reference to the Zenoh session.
    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }

    /// Publish an event to one client.
    ///
    /// The key is `<prefix>/clients/<client_id>/events/<kind>`.
    pub async fn publish_event(&self, client_id: &str, event: &BridgeEvent) -> Result<()> {
        let key = self.keys.event_key(client_id, event.kind());
        let payload =
            encode(event, self.format).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        self.publish_raw(&key, payload).await
    }

    /// Publish raw bytes to a key (for status messages, etc.).
    pub async fn publish_raw(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.session
            .put(key, payload)
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    /// Publish a JSON value to a key.
    pub async fn publish_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.publish_raw(key, payload).await
    }
}
