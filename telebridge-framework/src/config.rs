//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{BridgeError, Result};
use crate::{LoggingConfig, ZenohConfig};

/// Trait for bridge configuration types.
///
/// Implement this for a bridge's configuration struct to get JSON5
/// loading, validation and access to the shared sections.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use telebridge_framework::{BridgeConfig, LoggingConfig, ZenohConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub key_prefix: String,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn zenoh(&self) -> &ZenohConfig {
///         &self.zenoh
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn key_prefix(&self) -> &str {
///         &self.key_prefix
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned {
    /// Zenoh connection settings.
    fn zenoh(&self) -> &ZenohConfig;

    /// Logging settings.
    fn logging(&self) -> &LoggingConfig;

    /// Key expression prefix the bridge serves clients under.
    fn key_prefix(&self) -> &str;

    /// Validate the configuration.
    ///
    /// Called by [`load`](Self::load) and [`parse`](Self::parse).
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Parse configuration from JSON5 text and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        if config.key_prefix().trim_matches('/').is_empty() {
            return Err(BridgeError::validation("key_prefix must not be empty"));
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON5 file.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BridgeError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }
}
