//! Zenoh bridge for embedded devices.
//!
//! Serves interactive shells, metric monitors, screen checks and workspace
//! files to clients over the Zenoh command/event channel.

use std::sync::Arc;

use anyhow::Result;
use telebridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
use zenoh_bridge_device::process::SystemSpawner;
use zenoh_bridge_device::{BridgeServices, DeviceBridgeConfig, server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("device.json5");

    let config = DeviceBridgeConfig::load(&args.config).map_err(|e| anyhow::anyhow!("{}", e))?;
    let device_config = config.device.clone();

    let runner = BridgeRunner::new_with_args("device", config, Some(&args))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?
        .with_status_publishing()
        .with_format(device_config.format);

    let services = BridgeServices::new(device_config, Arc::new(SystemSpawner))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open workspace: {}", e))?;

    let metadata = serde_json::json!({
        "key_prefix": services.config.key_prefix,
        "bridge_tool": services.tool.program(),
        "fallback_address": services.recovery.fallback(),
        "mock_device_id": services.config.mock_device_id,
        "workspace_root": services.workspace.root().display().to_string(),
    });

    tracing::info!(
        prefix = %services.config.key_prefix,
        workspace = %services.workspace.root().display(),
        "Device bridge ready"
    );

    let publisher = runner.publisher();
    let mut runner = runner;
    runner.spawn_with_error("clients".to_string(), server::serve(services, publisher));

    runner
        .run_with_metadata(Some(metadata))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
