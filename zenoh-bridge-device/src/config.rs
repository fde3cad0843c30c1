//! Device bridge configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use telebridge_common::config::ZenohConfig;
use telebridge_common::{DEFAULT_DEVICE_PREFIX, Format};

pub use telebridge_framework::LoggingConfig;

/// Complete device bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBridgeConfig {
    /// Zenoh connection settings.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Device, session and workspace settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One way of dumping the screen to a file on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCandidate {
    /// Remote command; `{path}` is replaced by `remote_path`.
    pub command: String,
    /// Where the command leaves the image on the device.
    pub remote_path: String,
}

/// Device bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Key expression prefix clients talk to.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Payload encoding of outbound events.
    #[serde(default)]
    pub format: Format,

    /// Device-bridge CLI binary (name on PATH or absolute path).
    #[serde(default = "default_bridge_tool")]
    pub bridge_tool: String,

    /// Address reconnected by auto-recovery.
    #[serde(default = "default_fallback_address")]
    pub fallback_address: String,

    /// Device id that selects synthetic behaviour instead of real hardware.
    #[serde(default = "default_mock_device_id")]
    pub mock_device_id: String,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,

    /// Timeout of one-shot device commands (listing, capture, pull).
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// TCP connect timeout of SSH sessions.
    #[serde(default = "default_ssh_connect_timeout_ms")]
    pub ssh_connect_timeout_ms: u64,

    /// Log batch flush interval.
    #[serde(default = "default_log_flush_interval_ms")]
    pub log_flush_interval_ms: u64,

    /// Delay between shell readiness and writing the session command.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Rows kept per CPU/thread sample.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Remote command of the CPU monitor.
    #[serde(default = "default_cpu_monitor_command")]
    pub cpu_monitor_command: String,

    /// Remote command of the thread monitor; `{pid}` is replaced.
    #[serde(default = "default_thread_monitor_command")]
    pub thread_monitor_command: String,

    /// Remote command of the memory monitor; `{app}` and `{interval}` are replaced.
    #[serde(default = "default_memory_monitor_command")]
    pub memory_monitor_command: String,

    /// Workspace root; defaults to `$HOME/telebridge-workspace`.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Session log directory; defaults to `<workspace_root>/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Screen dump methods, tried in order.
    #[serde(default = "default_capture_candidates")]
    pub capture: Vec<CaptureCandidate>,

    /// Minimum confidence for a template match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    #[serde(default = "default_match_timeout_ms")]
    pub match_timeout_ms: u64,

    #[serde(default = "default_match_poll_interval_ms")]
    pub match_poll_interval_ms: u64,

    #[serde(default = "default_host_command_timeout_ms")]
    pub host_command_timeout_ms: u64,

    /// Host command output beyond this is truncated.
    #[serde(default = "default_max_host_output_bytes")]
    pub max_host_output_bytes: usize,

    /// Timeout of a background job's stop command.
    #[serde(default = "default_stop_command_timeout_ms")]
    pub stop_command_timeout_ms: u64,
}

fn default_key_prefix() -> String {
    DEFAULT_DEVICE_PREFIX.to_string()
}

fn default_bridge_tool() -> String {
    "sdb".to_string()
}

fn default_fallback_address() -> String {
    "192.168.250.250:26101".to_string()
}

fn default_mock_device_id() -> String {
    "mock".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_reconnect_timeout_ms() -> u64 {
    10_000
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_ssh_connect_timeout_ms() -> u64 {
    10_000
}

fn default_log_flush_interval_ms() -> u64 {
    30
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_top_n() -> usize {
    10
}

fn default_cpu_monitor_command() -> String {
    "top -d 1".to_string()
}

fn default_thread_monitor_command() -> String {
    "top -H -p {pid} -d 1".to_string()
}

fn default_memory_monitor_command() -> String {
    concat!(
        "while true; do ",
        "pid=$(pidof {app} | cut -d' ' -f1); ",
        "[ -n \"$pid\" ] && awk '/^Rss:/{r=$2} /^Pss:/{p=$2} /^Private_(Clean|Dirty):/{u+=$2} ",
        "/^Swap:/{s=$2} END{printf \"MEM PSS: %d RSS: %d USS: %d SWAP: %d\\n\", p, r, u, s}' ",
        "/proc/$pid/smaps_rollup; ",
        "sleep {interval}; done"
    )
    .to_string()
}

fn default_capture_candidates() -> Vec<CaptureCandidate> {
    vec![
        CaptureCandidate {
            command: "screenshot {path}".to_string(),
            remote_path: "/tmp/telebridge_screen.png".to_string(),
        },
        CaptureCandidate {
            command: "enlightenment_info -dump_screen {path}".to_string(),
            remote_path: "/opt/usr/home/owner/media/telebridge_screen.png".to_string(),
        },
    ]
}

fn default_match_threshold() -> f64 {
    0.8
}

fn default_match_timeout_ms() -> u64 {
    10_000
}

fn default_match_poll_interval_ms() -> u64 {
    1_000
}

fn default_host_command_timeout_ms() -> u64 {
    60_000
}

fn default_max_host_output_bytes() -> usize {
    1024 * 1024
}

fn default_stop_command_timeout_ms() -> u64 {
    10_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            format: Format::default(),
            bridge_tool: default_bridge_tool(),
            fallback_address: default_fallback_address(),
            mock_device_id: default_mock_device_id(),
            probe_timeout_ms: default_probe_timeout_ms(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            ssh_connect_timeout_ms: default_ssh_connect_timeout_ms(),
            log_flush_interval_ms: default_log_flush_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            top_n: default_top_n(),
            cpu_monitor_command: default_cpu_monitor_command(),
            thread_monitor_command: default_thread_monitor_command(),
            memory_monitor_command: default_memory_monitor_command(),
            workspace_root: None,
            log_dir: None,
            capture: default_capture_candidates(),
            match_threshold: default_match_threshold(),
            match_timeout_ms: default_match_timeout_ms(),
            match_poll_interval_ms: default_match_poll_interval_ms(),
            host_command_timeout_ms: default_host_command_timeout_ms(),
            max_host_output_bytes: default_max_host_output_bytes(),
            stop_command_timeout_ms: default_stop_command_timeout_ms(),
        }
    }
}

impl DeviceConfig {
    /// Configured workspace root, or `$HOME/telebridge-workspace`.
    pub fn workspace_root(&self) -> PathBuf {
        match &self.workspace_root {
            Some(root) => root.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("telebridge-workspace"),
        }
    }

    /// Configured log directory, or `logs` under the given workspace root.
    pub fn log_dir(&self, workspace_root: &std::path::Path) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| workspace_root.join("logs"))
    }

    pub fn is_mock(&self, device_id: &str) -> bool {
        device_id == self.mock_device_id
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_connect_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.log_flush_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn host_command_timeout(&self) -> Duration {
        Duration::from_millis(self.host_command_timeout_ms)
    }

    pub fn stop_command_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_command_timeout_ms)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.bridge_tool.trim().is_empty() {
            return Err("device.bridge_tool must not be empty".to_string());
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(format!(
                "device.match_threshold must be in (0, 1], got {}",
                self.match_threshold
            ));
        }
        if self.top_n == 0 {
            return Err("device.top_n must be at least 1".to_string());
        }
        if self.log_flush_interval_ms == 0 {
            return Err("device.log_flush_interval_ms must be positive".to_string());
        }
        if self.match_poll_interval_ms == 0 {
            return Err("device.match_poll_interval_ms must be positive".to_string());
        }
        if self.capture.is_empty() {
            return Err("device.capture needs at least one candidate".to_string());
        }
        for (i, candidate) in self.capture.iter().enumerate() {
            if !candidate.command.contains("{path}") {
                return Err(format!("device.capture[{}] command lacks {{path}}", i));
            }
        }
        if !self.thread_monitor_command.contains("{pid}") {
            return Err("device.thread_monitor_command lacks {pid}".to_string());
        }
        if !self.memory_monitor_command.contains("{app}") {
            return Err("device.memory_monitor_command lacks {app}".to_string());
        }
        Ok(())
    }
}

impl Default for DeviceBridgeConfig {
    fn default() -> Self {
        Self {
            zenoh: ZenohConfig::default(),
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl telebridge_framework::BridgeConfig for DeviceBridgeConfig {
    fn zenoh(&self) -> &ZenohConfig {
        &self.zenoh
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn key_prefix(&self) -> &str {
        &self.device.key_prefix
    }

    fn validate(&self) -> telebridge_framework::Result<()> {
        self.device
            .validate()
            .map_err(telebridge_framework::BridgeError::validation)
    }
}
