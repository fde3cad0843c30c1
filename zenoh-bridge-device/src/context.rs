//! Bridge-wide services and the per-client command context.
//!
//! [`BridgeServices`] is built once at startup and shared by every client:
//! the device tool, auto-recovery, the workspace, the job registry, the
//! screen matcher and the host executor. [`ClientContext`] holds what
//! belongs to one client: its session, monitors, in-flight tasks, log
//! filter and event sink.

use std::sync::Arc;
use std::time::Duration;

use telebridge_common::{
    BridgeCommand, BridgeEvent, DeviceInfo, DirEntry, EntryKind, JobState, MonitorKind,
    WorkspaceOp,
};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::DeviceConfig;
use crate::device::DeviceTool;
use crate::events::EventSink;
use crate::filter::KeywordFilter;
use crate::host::HostExecutor;
use crate::jobs::{JobRegistry, job_status};
use crate::monitor::{MonitorRequest, MonitorSet};
use crate::process::ProcessSpawner;
use crate::recovery::AutoRecovery;
use crate::screen::{MatchError, ScreenMatcher};
use crate::session::SessionController;
use crate::workspace::{WorkspaceError, WorkspaceGateway};

/// Shared, bridge-wide services.
#[derive(Debug)]
pub struct BridgeServices {
    pub config: DeviceConfig,
    pub tool: DeviceTool,
    pub recovery: AutoRecovery,
    pub workspace: Arc<WorkspaceGateway>,
    pub jobs: JobRegistry,
    pub screen: ScreenMatcher,
    pub host: HostExecutor,
}

impl BridgeServices {
    /// Open the workspace and pick the device tool binary.
    pub async fn new(
        config: DeviceConfig,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Result<Arc<Self>, WorkspaceError> {
        let workspace = Arc::new(WorkspaceGateway::open(config.workspace_root()).await?);
        let tool = DeviceTool::resolve(
            Arc::clone(&spawner),
            &config.bridge_tool,
            config.command_timeout(),
            config.probe_timeout(),
        )
        .await;
        Ok(Arc::new(Self::assemble(config, spawner, tool, workspace)))
    }

    /// Build from an already opened workspace and tool.
    pub fn assemble(
        config: DeviceConfig,
        spawner: Arc<dyn ProcessSpawner>,
        tool: DeviceTool,
        workspace: Arc<WorkspaceGateway>,
    ) -> Self {
        let recovery = AutoRecovery::new(
            tool.clone(),
            config.fallback_address.clone(),
            config.reconnect_timeout(),
        );
        let jobs = JobRegistry::new(
            Arc::clone(&spawner),
            Arc::clone(&workspace),
            config.stop_command_timeout(),
        );
        let screen = ScreenMatcher::new(
            tool.clone(),
            recovery.clone(),
            config.capture.clone(),
            config.match_threshold,
            config.mock_device_id.clone(),
        );
        let host = HostExecutor::new(
            spawner,
            config.host_command_timeout(),
            config.max_host_output_bytes,
        );

        Self {
            config,
            tool,
            recovery,
            workspace,
            jobs,
            screen,
            host,
        }
    }
}

/// State and command dispatch of one connected client.
#[derive(Debug)]
pub struct ClientContext {
    client_id: String,
    services: Arc<BridgeServices>,
    sink: EventSink,
    session: SessionController,
    monitors: MonitorSet,
    tasks: JoinSet<()>,
    log_filter: watch::Sender<Option<KeywordFilter>>,
}

impl ClientContext {
    pub fn new(client_id: impl Into<String>, services: Arc<BridgeServices>, sink: EventSink) -> Self {
        let (log_filter, filter_rx) = watch::channel(None);
        let session = SessionController::new(Arc::clone(&services), sink.clone(), filter_rx);
        Self {
            client_id: client_id.into(),
            services,
            sink,
            session,
            monitors: MonitorSet::new(),
            tasks: JoinSet::new(),
            log_filter,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn monitors(&self) -> &MonitorSet {
        &self.monitors
    }

    /// Dispatch one command.
    ///
    /// Session and monitor commands act immediately; anything that waits on
    /// a device, the disk or a child process runs as a task of this client
    /// so later commands are not held up.
    pub async fn handle(&mut self, command: BridgeCommand) {
        self.reap();
        tracing::debug!(client = %self.client_id, command = command.name(), "Handling command");

        let services = Arc::clone(&self.services);
        let sink = self.sink.clone();

        match command {
            BridgeCommand::OpenSession(params) => self.session.open(params).await,
            BridgeCommand::CloseSession => self.session.close().await,
            BridgeCommand::WriteToShell { data } => self.session.write(&data),
            BridgeCommand::SubmitAuthResponse { value } => {
                if !self.session.auth().answer(value) {
                    tracing::warn!(client = %self.client_id, "Auth response without a pending prompt");
                }
            }
            BridgeCommand::ListDevices => {
                self.tasks.spawn(list_devices(services, sink));
            }
            BridgeCommand::StartCpuMonitor { device_id } => {
                self.monitors
                    .start(services, sink, device_id, MonitorRequest::Cpu);
            }
            BridgeCommand::StartThreadMonitor { device_id, pid } => {
                self.monitors
                    .start(services, sink, device_id, MonitorRequest::Thread { pid });
            }
            BridgeCommand::StartMemoryMonitor {
                device_id,
                app_name,
                interval_seconds,
            } => {
                let request = MonitorRequest::Memory {
                    app_name,
                    interval_seconds,
                };
                self.monitors.start(services, sink, device_id, request);
            }
            BridgeCommand::StopCpuMonitor { .. } => self.stop_monitor(MonitorKind::Cpu),
            BridgeCommand::StopThreadMonitor { .. } => self.stop_monitor(MonitorKind::Thread),
            BridgeCommand::StopMemoryMonitor { .. } => self.stop_monitor(MonitorKind::Memory),
            BridgeCommand::CaptureScreen { device_id } => {
                self.tasks.spawn(capture_screen(services, sink, device_id));
            }
            BridgeCommand::MatchImage {
                screen_path,
                template_path,
            } => {
                self.tasks
                    .spawn(match_image(services, sink, screen_path, template_path));
            }
            BridgeCommand::WaitForImageMatch {
                template_path,
                device_id,
                timeout_ms,
                poll_interval_ms,
            } => {
                let timeout = timeout_ms.unwrap_or(services.config.match_timeout_ms);
                let poll = poll_interval_ms.unwrap_or(services.config.match_poll_interval_ms);
                self.tasks.spawn(wait_for_match(
                    services,
                    sink,
                    device_id,
                    template_path,
                    Duration::from_millis(timeout),
                    Duration::from_millis(poll.max(1)),
                ));
            }
            BridgeCommand::SaveWorkspaceFile { path, content } => {
                self.tasks.spawn(async move {
                    let result = services.workspace.save(&path, &content).await;
                    let event = match result {
                        Ok(saved) => workspace_result(
                            WorkspaceOp::Save,
                            services.workspace.display_path(&saved),
                            Ok(format!("Saved {} bytes", content.len())),
                        ),
                        Err(e) => workspace_result(WorkspaceOp::Save, path, Err(e)),
                    };
                    sink.emit(event);
                });
            }
            BridgeCommand::LoadWorkspaceFile { path } => {
                self.tasks.spawn(async move {
                    let result = services.workspace.load(&path).await;
                    let event = match result {
                        Ok(content) => BridgeEvent::WorkspaceFileResult {
                            operation: WorkspaceOp::Load,
                            path,
                            success: true,
                            message: format!("Loaded {} bytes", content.len()),
                            content: Some(content),
                            entries: None,
                        },
                        Err(e) => workspace_result(WorkspaceOp::Load, path, Err(e)),
                    };
                    sink.emit(event);
                });
            }
            BridgeCommand::ListWorkspaceFiles { path } => {
                self.tasks.spawn(async move {
                    let result = services.workspace.list(&path).await;
                    let event = match result {
                        Ok(entries) => BridgeEvent::WorkspaceFileResult {
                            operation: WorkspaceOp::List,
                            path,
                            success: true,
                            message: format!("{} entries", entries.len()),
                            content: None,
                            entries: Some(entries),
                        },
                        Err(e) => workspace_result(WorkspaceOp::List, path, Err(e)),
                    };
                    sink.emit(event);
                });
            }
            BridgeCommand::RunHostCommand {
                command,
                request_id,
            } => {
                self.tasks.spawn(async move {
                    let result = services.host.run(&command).await;
                    sink.emit(BridgeEvent::HostCommandResult {
                        request_id,
                        success: result.success,
                        output: result.output,
                    });
                });
            }
            BridgeCommand::StartBackgroundJob { command, filename } => {
                self.tasks.spawn(async move {
                    let event = match services.jobs.start(&command, &filename, sink.clone()).await {
                        Ok(id) => job_status(
                            id,
                            true,
                            JobState::Started,
                            None,
                            format!("Job started: {command}"),
                        ),
                        Err(e) => {
                            tracing::warn!(command = %command, error = %e, "Background job not started");
                            job_status(String::new(), false, JobState::Error, None, e.to_string())
                        }
                    };
                    sink.emit(event);
                });
            }
            BridgeCommand::StopBackgroundJob { id, stop_command } => {
                self.tasks.spawn(async move {
                    let event = services.jobs.stop(&id, stop_command.as_deref()).await;
                    sink.emit(event);
                });
            }
            BridgeCommand::SetLogFilter {
                keywords,
                case_sensitive,
            } => self.set_log_filter(&keywords, case_sensitive),
            BridgeCommand::ListRemoteDir { device_id, path } => {
                self.tasks
                    .spawn(list_remote_dir(services, sink, device_id, path));
            }
        }
    }

    fn stop_monitor(&mut self, kind: MonitorKind) {
        let message = if self.monitors.stop(kind) {
            format!("{kind} monitor stopped")
        } else {
            format!("No {kind} monitor running")
        };
        self.sink.emit(BridgeEvent::MonitorStatus {
            monitor: kind,
            status: "stopped".to_string(),
            message,
        });
    }

    fn set_log_filter(&mut self, keywords: &[String], case_sensitive: bool) {
        match KeywordFilter::new(keywords, case_sensitive) {
            Ok(filter) => {
                tracing::info!(
                    client = %self.client_id,
                    keywords = ?filter.keywords(),
                    case_sensitive,
                    "Log filter updated"
                );
                let active = filter.is_active();
                self.log_filter.send_replace(active.then_some(filter));
            }
            Err(e) => {
                tracing::warn!(client = %self.client_id, error = %e, "Invalid log filter");
            }
        }
    }

    /// Collect finished tasks, logging any that panicked.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!(client = %self.client_id, error = %e, "Client task panicked");
                }
            }
        }
    }

    /// Tear down the session and monitors and abort in-flight tasks.
    ///
    /// Background jobs keep running.
    pub async fn shutdown(&mut self) {
        self.session.teardown().await;
        self.monitors.stop_all();
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        tracing::info!(client = %self.client_id, "Client context shut down");
    }
}

fn workspace_result(
    operation: WorkspaceOp,
    path: String,
    outcome: Result<String, WorkspaceError>,
) -> BridgeEvent {
    let (success, message) = match outcome {
        Ok(message) => (true, message),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Workspace operation failed");
            (false, e.to_string())
        }
    };
    BridgeEvent::WorkspaceFileResult {
        operation,
        path,
        success,
        content: None,
        entries: None,
        message,
    }
}

fn mock_device(services: &BridgeServices) -> DeviceInfo {
    DeviceInfo {
        id: services.config.mock_device_id.clone(),
        state: "device".to_string(),
        model: Some("synthetic".to_string()),
    }
}

async fn list_devices(services: Arc<BridgeServices>, sink: EventSink) {
    let mock = mock_device(&services);
    let event = match services.tool.devices().await {
        Ok(mut devices) => {
            if !devices.iter().any(|d| d.id == mock.id) {
                devices.push(mock);
            }
            BridgeEvent::DeviceList {
                devices,
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Device listing failed");
            BridgeEvent::DeviceList {
                devices: vec![mock],
                error: Some(e.to_string()),
            }
        }
    };
    sink.emit(event);
}

async fn capture_screen(services: Arc<BridgeServices>, sink: EventSink, device_id: String) {
    let event = match services
        .screen
        .capture_screen(&sink, &services.workspace, &device_id)
        .await
    {
        Ok(path) => BridgeEvent::CaptureResult {
            success: true,
            message: format!("Captured {path}"),
            path: Some(path),
        },
        Err(e) => {
            tracing::warn!(device = %device_id, error = %e, "Screen capture failed");
            BridgeEvent::CaptureResult {
                success: false,
                path: None,
                message: e.to_string(),
            }
        }
    };
    sink.emit(event);
}

async fn match_image(
    services: Arc<BridgeServices>,
    sink: EventSink,
    screen_path: String,
    template_path: String,
) {
    let outcome = async {
        let screen = services.workspace.resolve(&screen_path).await?;
        let template = services.workspace.resolve(&template_path).await?;
        services.screen.match_files(screen, template).await
    }
    .await;

    let event = match outcome {
        Ok(report) => BridgeEvent::MatchResult {
            success: report.success,
            message: format!(
                "Best match {:.3} at ({}, {}), threshold {}",
                report.confidence,
                report.bounds.x,
                report.bounds.y,
                services.screen.threshold()
            ),
            report: Some(report),
        },
        Err(e) => {
            tracing::warn!(screen = %screen_path, template = %template_path, error = %e, "Match failed");
            BridgeEvent::MatchResult {
                report: None,
                success: false,
                message: e.to_string(),
            }
        }
    };
    sink.emit(event);
}

async fn wait_for_match(
    services: Arc<BridgeServices>,
    sink: EventSink,
    device_id: String,
    template_path: String,
    timeout: Duration,
    poll_interval: Duration,
) {
    let template = match services.workspace.resolve(&template_path).await {
        Ok(template) => template,
        Err(e) => {
            sink.emit(BridgeEvent::WaitForImageResult {
                success: false,
                timed_out: false,
                attempts: 0,
                elapsed_ms: 0,
                report: None,
                message: MatchError::from(e).to_string(),
            });
            return;
        }
    };

    let outcome = services
        .screen
        .wait_for_match(&sink, &device_id, template, timeout, poll_interval)
        .await;
    sink.emit(BridgeEvent::WaitForImageResult {
        success: outcome.success,
        timed_out: outcome.timed_out,
        attempts: outcome.attempts,
        elapsed_ms: outcome.elapsed_ms,
        report: outcome.report,
        message: outcome.message,
    });
}

/// Fixed listing served for the mock device.
fn mock_listing() -> Vec<DirEntry> {
    let dir = |name: &str| DirEntry {
        name: name.to_string(),
        kind: EntryKind::Directory,
        size: None,
        permissions: "drwxr-xr-x".to_string(),
    };
    vec![
        dir("apps"),
        DirEntry {
            name: "dlog.conf".to_string(),
            kind: EntryKind::File,
            size: Some(512),
            permissions: "-rw-r--r--".to_string(),
        },
        dir("media"),
        dir("tmp"),
    ]
}

async fn list_remote_dir(
    services: Arc<BridgeServices>,
    sink: EventSink,
    device_id: String,
    path: String,
) {
    let listing = if services.config.is_mock(&device_id) {
        Ok(mock_listing())
    } else {
        services
            .recovery
            .run(&sink, |_| services.tool.list_dir(&device_id, &path))
            .await
    };

    let event = match listing {
        Ok(entries) => BridgeEvent::RemoteDirListing {
            message: format!("{} entries", entries.len()),
            device_id,
            path,
            success: true,
            entries,
        },
        Err(e) => {
            tracing::warn!(device = %device_id, path = %path, error = %e, "Remote listing failed");
            BridgeEvent::RemoteDirListing {
                device_id,
                path,
                success: false,
                entries: Vec::new(),
                message: e.to_string(),
            }
        }
    };
    sink.emit(event);
}
