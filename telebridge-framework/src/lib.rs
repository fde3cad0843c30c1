//! Telebridge Bridge Framework
//!
//! Common abstractions for bridges that serve clients over the Zenoh
//! command/event channel.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`Publisher`] for pushing [`BridgeEvent`]s to clients with automatic serialization
//! - [`ClientPresence`] for following client liveliness tokens
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use telebridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new("mybridge", config).await?;
//!     runner.spawn(serve_clients(runner.publisher()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod presence;
mod publisher;
mod runner;
mod status;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use presence::{ClientPresence, PresenceChange};
pub use publisher::Publisher;
pub use runner::BridgeRunner;
pub use status::{BridgeState, BridgeStatus, StatusPublisher};

// Re-export commonly used types from telebridge-common
pub use telebridge_common::{
    BridgeCommand, BridgeEvent, ClientKeys, Format, LoggingConfig, ZenohConfig,
};
