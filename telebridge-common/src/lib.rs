//! Telebridge Common Library
//!
//! Shared types and utilities for the telebridge device bridge and its clients:
//!
//! - [`command`] - Commands a client sends to the bridge
//! - [`event`] - Events the bridge pushes to a client
//! - [`metrics`] - CPU/thread/memory samples and listings carried by events
//! - [`keyexpr`] - Key expressions of the command/event channel
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`error`] - Error types

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod keyexpr;
pub mod metrics;
pub mod serialization;
pub mod session;

pub use command::{BridgeCommand, OpenSessionParams, Transport};
pub use config::{LogFormat, LoggingConfig, ZenohConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use event::{
    BridgeEvent, ErrorCategory, JobState, MatchReport, MonitorKind, Rect, SessionState,
    WorkspaceOp,
};
pub use keyexpr::{ClientKeys, DEFAULT_DEVICE_PREFIX, KEY_PREFIX};
pub use metrics::{
    DeviceInfo, DirEntry, EntryKind, MemoryFigures, MemorySample, MetricRow, TableSample,
    current_timestamp_millis,
};
pub use serialization::{Format, decode, decode_auto, encode};
pub use session::connect;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Supports two
/// output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}
