//! Events pushed from the bridge to a client.
//!
//! Each event is published on
//! `<prefix>/clients/<client_id>/events/<kind>` where `<kind>` is
//! [`BridgeEvent::kind`].

use serde::{Deserialize, Serialize};

use crate::metrics::{DeviceInfo, DirEntry, MemorySample, TableSample};

/// Lifecycle state of the remote shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    /// Auto-recovery is reconnecting the fallback address.
    Reconnecting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Reconnecting => "reconnecting",
        }
    }
}

/// User-facing classification of a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    AuthFailed,
    ConnectionRefused,
    HostNotFound,
    Timeout,
    TargetNotFound,
    Other,
}

/// Which continuous monitor an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Cpu,
    Thread,
    Memory,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Cpu => "cpu",
            MonitorKind::Thread => "thread",
            MonitorKind::Memory => "memory",
        }
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned rectangle in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Outcome of one template match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// Confidence cleared the threshold.
    pub success: bool,
    /// Best normalised correlation score in `[-1, 1]`.
    pub confidence: f64,
    /// Best-match placement of the template.
    pub bounds: Rect,
}

/// Workspace operation a result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceOp {
    Save,
    Load,
    List,
}

/// Lifecycle state of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Started,
    Exited,
    Stopped,
    Error,
}

/// Event pushed from the bridge to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    SessionStatus {
        status: SessionState,
        message: String,
    },
    SessionError {
        message: String,
        category: ErrorCategory,
    },
    /// Batched shell output.
    LogChunk { text: String },
    /// Transport diagnostics (only when debug is enabled).
    DebugLog { text: String },
    /// An interactive authentication prompt awaiting `submit_auth_response`.
    AuthChallenge { prompt: String, echo: bool },
    DeviceList {
        devices: Vec<DeviceInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CpuSample(TableSample),
    ThreadSample {
        pid: String,
        #[serde(flatten)]
        sample: TableSample,
    },
    MemorySample(MemorySample),
    /// A monitor stopped on its own or failed to start.
    MonitorStatus {
        monitor: MonitorKind,
        status: String,
        message: String,
    },
    CaptureResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        message: String,
    },
    MatchResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<MatchReport>,
        success: bool,
        message: String,
    },
    WaitForImageResult {
        success: bool,
        timed_out: bool,
        attempts: u32,
        elapsed_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<MatchReport>,
        message: String,
    },
    WorkspaceFileResult {
        operation: WorkspaceOp,
        path: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        entries: Option<Vec<DirEntry>>,
        message: String,
    },
    HostCommandResult {
        request_id: String,
        success: bool,
        output: String,
    },
    BackgroundJobStatus {
        id: String,
        success: bool,
        status: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        message: String,
    },
    RemoteDirListing {
        device_id: String,
        path: String,
        success: bool,
        entries: Vec<DirEntry>,
        message: String,
    },
}

impl BridgeEvent {
    /// Kebab-case event name used as the last key-expression chunk.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeEvent::SessionStatus { .. } => "session-status",
            BridgeEvent::SessionError { .. } => "session-error",
            BridgeEvent::LogChunk { .. } => "log-chunk",
            BridgeEvent::DebugLog { .. } => "debug-log",
            BridgeEvent::AuthChallenge { .. } => "auth-challenge",
            BridgeEvent::DeviceList { .. } => "device-list",
            BridgeEvent::CpuSample(_) => "cpu-sample",
            BridgeEvent::ThreadSample { .. } => "thread-sample",
            BridgeEvent::MemorySample(_) => "memory-sample",
            BridgeEvent::MonitorStatus { .. } => "monitor-status",
            BridgeEvent::CaptureResult { .. } => "capture-result",
            BridgeEvent::MatchResult { .. } => "match-result",
            BridgeEvent::WaitForImageResult { .. } => "wait-for-image-result",
            BridgeEvent::WorkspaceFileResult { .. } => "workspace-file-result",
            BridgeEvent::HostCommandResult { .. } => "host-command-result",
            BridgeEvent::BackgroundJobStatus { .. } => "background-job-status",
            BridgeEvent::RemoteDirListing { .. } => "remote-dir-listing",
        }
    }

    /// Shorthand for a `session_status` event.
    pub fn status(status: SessionState, message: impl Into<String>) -> Self {
        BridgeEvent::SessionStatus {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricRow;

    #[test]
    fn test_status_serialization() {
        let event = BridgeEvent::status(SessionState::Reconnecting, "Reconnecting fallback");
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"type\":\"session_status\""));
        assert!(json.contains("\"status\":\"reconnecting\""));
        assert_eq!(event.kind(), "session-status");
    }

    #[test]
    fn test_thread_sample_flattens_table() {
        let event = BridgeEvent::ThreadSample {
            pid: "812".to_string(),
            sample: TableSample {
                timestamp: 5,
                total: 12.0,
                rows: vec![MetricRow {
                    id: "815".to_string(),
                    owner: "812".to_string(),
                    value: 7.0,
                    name: "RenderThread".to_string(),
                }],
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["pid"], "812");
        assert_eq!(json["total"], 12.0);
        assert_eq!(json["rows"][0]["name"], "RenderThread");

        let back: BridgeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_job_status_omits_missing_code() {
        let event = BridgeEvent::BackgroundJobStatus {
            id: "job".to_string(),
            success: true,
            status: JobState::Started,
            code: None,
            message: String::new(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("code"));
        assert_eq!(event.kind(), "background-job-status");
    }
}
