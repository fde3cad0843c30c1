//! Commands sent from a client to the bridge.
//!
//! Commands travel on `<prefix>/clients/<client_id>/cmd` and are tagged by
//! `type`:
//!
//! ```json
//! {"type": "open_session", "transport": "bridge", "device_id": "mock",
//!  "command": "dlogutil -v kerneltime $(TAGS)", "tags": ["UI", "NET"]}
//! ```

use serde::{Deserialize, Serialize};

/// Remote shell transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Secure-shell session to `host:port`.
    Ssh,
    /// Vendor device-bridge CLI (`sdb`) to a device id.
    Bridge,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Ssh => "ssh",
            Transport::Bridge => "bridge",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of an `open_session` command.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenSessionParams {
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Emit `debug_log` events with transport diagnostics.
    #[serde(default)]
    pub debug: bool,
    /// Append raw output (and debug lines) to timestamped files.
    #[serde(default)]
    pub save_to_file: bool,
    /// Command template written to the shell once it is ready.
    #[serde(default)]
    pub command: String,
    /// Values substituted for the tag placeholder in `command`.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl OpenSessionParams {
    /// Human-readable target: `host:port` or the device id.
    pub fn target(&self) -> String {
        match self.transport {
            Transport::Ssh => format!(
                "{}:{}",
                self.host.as_deref().unwrap_or(""),
                self.port.unwrap_or(22)
            ),
            Transport::Bridge => self.device_id.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for OpenSessionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSessionParams")
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("device_id", &self.device_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("debug", &self.debug)
            .field("save_to_file", &self.save_to_file)
            .field("command", &self.command)
            .field("tags", &self.tags)
            .finish()
    }
}

fn default_memory_interval() -> u64 {
    2
}

/// Command sent from a client to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    /// Open the (single) remote shell, replacing any live one.
    OpenSession(OpenSessionParams),
    /// Tear down the live shell.
    CloseSession,
    /// Forward keystrokes to the live shell.
    WriteToShell { data: String },
    /// Answer the pending authentication prompt.
    SubmitAuthResponse { value: String },
    /// List devices known to the bridge tool.
    ListDevices,
    StartCpuMonitor { device_id: String },
    StopCpuMonitor {
        #[serde(default)]
        device_id: Option<String>,
    },
    StartThreadMonitor { device_id: String, pid: String },
    StopThreadMonitor {
        #[serde(default)]
        device_id: Option<String>,
    },
    StartMemoryMonitor {
        device_id: String,
        app_name: String,
        #[serde(default = "default_memory_interval")]
        interval_seconds: u64,
    },
    StopMemoryMonitor {
        #[serde(default)]
        device_id: Option<String>,
    },
    /// Capture the device screen into the workspace.
    CaptureScreen { device_id: String },
    /// Match a template against a screen image (both workspace paths).
    MatchImage {
        screen_path: String,
        template_path: String,
    },
    /// Poll capture+match until the template is found or the deadline passes.
    WaitForImageMatch {
        template_path: String,
        device_id: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        poll_interval_ms: Option<u64>,
    },
    SaveWorkspaceFile { path: String, content: String },
    LoadWorkspaceFile { path: String },
    ListWorkspaceFiles {
        #[serde(default)]
        path: String,
    },
    /// Run an arbitrary host shell command (unsandboxed).
    RunHostCommand { command: String, request_id: String },
    StartBackgroundJob { command: String, filename: String },
    StopBackgroundJob {
        id: String,
        #[serde(default)]
        stop_command: Option<String>,
    },
    /// Restrict streamed log lines to those containing any keyword.
    SetLogFilter {
        #[serde(default)]
        keywords: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    /// List a directory on the device.
    ListRemoteDir { device_id: String, path: String },
}

impl BridgeCommand {
    /// Snake-case command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::OpenSession(_) => "open_session",
            BridgeCommand::CloseSession => "close_session",
            BridgeCommand::WriteToShell { .. } => "write_to_shell",
            BridgeCommand::SubmitAuthResponse { .. } => "submit_auth_response",
            BridgeCommand::ListDevices => "list_devices",
            BridgeCommand::StartCpuMonitor { .. } => "start_cpu_monitor",
            BridgeCommand::StopCpuMonitor { .. } => "stop_cpu_monitor",
            BridgeCommand::StartThreadMonitor { .. } => "start_thread_monitor",
            BridgeCommand::StopThreadMonitor { .. } => "stop_thread_monitor",
            BridgeCommand::StartMemoryMonitor { .. } => "start_memory_monitor",
            BridgeCommand::StopMemoryMonitor { .. } => "stop_memory_monitor",
            BridgeCommand::CaptureScreen { .. } => "capture_screen",
            BridgeCommand::MatchImage { .. } => "match_image",
            BridgeCommand::WaitForImageMatch { .. } => "wait_for_image_match",
            BridgeCommand::SaveWorkspaceFile { .. } => "save_workspace_file",
            BridgeCommand::LoadWorkspaceFile { .. } => "load_workspace_file",
            BridgeCommand::ListWorkspaceFiles { .. } => "list_workspace_files",
            BridgeCommand::RunHostCommand { .. } => "run_host_command",
            BridgeCommand::StartBackgroundJob { .. } => "start_background_job",
            BridgeCommand::StopBackgroundJob { .. } => "stop_background_job",
            BridgeCommand::SetLogFilter { .. } => "set_log_filter",
            BridgeCommand::ListRemoteDir { .. } => "list_remote_dir",
        }
    }
}
