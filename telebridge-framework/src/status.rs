//! Bridge status reporting.

use serde::{Deserialize, Serialize};
use telebridge_common::current_timestamp_millis;

use crate::Result;
use crate::publisher::Publisher;

/// Coarse lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Running,
    Offline,
    Error,
}

/// Bridge status information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    /// Bridge name (e.g., "device").
    pub bridge: String,
    /// Bridge version.
    pub version: String,
    pub status: BridgeState,
    /// Unix epoch milliseconds when the status was produced.
    pub timestamp: i64,
    /// Additional bridge-specific metadata.
    #[serde(flatten)]
    pub metadata: serde_json::Value,
}

impl BridgeStatus {
    fn with_state(bridge: &str, version: &str, status: BridgeState) -> Self {
        Self {
            bridge: bridge.to_string(),
            version: version.to_string(),
            status,
            timestamp: current_timestamp_millis(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn running(bridge: &str, version: &str) -> Self {
        Self::with_state(bridge, version, BridgeState::Running)
    }

    pub fn offline(bridge: &str, version: &str) -> Self {
        Self::with_state(bridge, version, BridgeState::Offline)
    }

    pub fn error(bridge: &str, version: &str, error: impl Into<String>) -> Self {
        Self::with_state(bridge, version, BridgeState::Error)
            .with_metadata(serde_json::json!({ "error": error.into() }))
    }

    /// Replace the metadata object.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Publish this status to `<prefix>/@/status`.
    pub async fn publish(&self, publisher: &Publisher) -> Result<()> {
        let key = publisher.keys().status_key();
        publisher.publish_json(&key, self).await
    }
}

/// Publishes bridge status on startup and shutdown.
pub struct StatusPublisher {
    publisher: Publisher,
    bridge_name: String,
    version: String,
}

impl StatusPublisher {
    pub fn new(
        publisher: Publisher,
        bridge_name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            bridge_name: bridge_name.into(),
            version: version.into(),
        }
    }

    /// Publish "running" status with optional metadata.
    pub async fn publish_running(&self, metadata: Option<serde_json::Value>) -> Result<()> {
        let mut status = BridgeStatus::running(&self.bridge_name, &self.version);
        if let Some(meta) = metadata {
            status = status.with_metadata(meta);
        }
        status.publish(&self.publisher).await
    }

    pub async fn publish_offline(&self) -> Result<()> {
        BridgeStatus::offline(&self.bridge_name, &self.version)
            .publish(&self.publisher)
            .await
    }

    pub async fn publish_error(&self, error: impl Into<String>) -> Result<()> {
        BridgeStatus::error(&self.bridge_name, &self.version, error)
            .publish(&self.publisher)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_running() {
        let status = BridgeStatus::running("device", "0.1.0");
        assert_eq!(status.bridge, "device");
        assert_eq!(status.status, BridgeState::Running);
        assert!(status.timestamp > 0);
    }

    #[test]
    fn test_status_serialization_flattens_metadata() {
        let status = BridgeStatus::running("device", "1.0.0")
            .with_metadata(serde_json::json!({ "bridge_tool": "sdb", "clients": 2 }));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["bridge_tool"], "sdb");
        assert_eq!(json["clients"], 2);
    }

    #[test]
    fn test_error_status_carries_message() {
        let status = BridgeStatus::error("device", "0.1.0", "tool missing");
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("\"error\":\"tool missing\""));
    }
}
