//! Zenoh bridge for embedded devices.
//!
//! Clients drive the bridge over a Zenoh command/event channel:
//!
//! ```text
//! {prefix}/clients/{client_id}/cmd             commands in
//! {prefix}/clients/{client_id}/events/{kind}   events out
//! ```
//!
//! Each client gets one interactive shell (SSH, the device-bridge CLI, or
//! the synthetic `mock` device) whose output is streamed as batched
//! `log-chunk` events, plus continuous CPU/thread/memory monitors, screen
//! capture and template matching, a sandboxed workspace, host commands and
//! background capture jobs.

pub mod batch;
pub mod config;
pub mod context;
pub mod device;
pub mod events;
pub mod filter;
pub mod host;
pub mod jobs;
pub mod monitor;
pub mod parser;
pub mod process;
pub mod recovery;
pub mod screen;
pub mod server;
pub mod session;
pub mod template;
pub mod workspace;

pub use config::{DeviceBridgeConfig, DeviceConfig};
pub use context::{BridgeServices, ClientContext};
pub use events::EventSink;
