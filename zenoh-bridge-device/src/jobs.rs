//! Background job registry.
//!
//! Jobs are long-running host commands whose stdout and stderr append to a
//! workspace file. They belong to the bridge, not to a client: a client
//! going away leaves its jobs running, and any client can stop a job by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use telebridge_common::{BridgeEvent, JobState};
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::events::EventSink;
use crate::process::{CommandSpec, ProcessSpawner, run_to_completion};
use crate::workspace::{WorkspaceError, WorkspaceGateway};

#[derive(Error, Debug)]
pub enum JobError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Failed to start job: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Build a `background_job_status` event.
pub fn job_status(
    id: impl Into<String>,
    success: bool,
    status: JobState,
    code: Option<i32>,
    message: impl Into<String>,
) -> BridgeEvent {
    BridgeEvent::BackgroundJobStatus {
        id: id.into(),
        success,
        status,
        code,
        message: message.into(),
    }
}

#[derive(Debug)]
struct JobEntry {
    command: String,
    kill: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

type JobTable = Arc<Mutex<HashMap<String, JobEntry>>>;

/// Supervises background jobs, keyed by a generated id.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    jobs: JobTable,
    spawner: Arc<dyn ProcessSpawner>,
    workspace: Arc<WorkspaceGateway>,
    stop_timeout: Duration,
}

impl JobRegistry {
    pub fn new(
        spawner: Arc<dyn ProcessSpawner>,
        workspace: Arc<WorkspaceGateway>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            spawner,
            workspace,
            stop_timeout,
        }
    }

    /// Start `command` with output appended to `jobs/<filename>`.
    ///
    /// Returns the job id. Nothing is registered if the process fails to
    /// start. Exit events go to `sink`.
    pub async fn start(
        &self,
        command: &str,
        filename: &str,
        sink: EventSink,
    ) -> Result<String, JobError> {
        let sink_path = self.workspace.resolve(&format!("jobs/{filename}")).await?;
        if let Some(parent) = sink_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(JobError::Spawn)?;
        }

        let spec = CommandSpec::shell(command).with_sink(&sink_path);
        let mut jobs = self.jobs.lock().await;
        let child = self.spawner.spawn(&spec).map_err(JobError::Spawn)?;

        let id = uuid::Uuid::new_v4().to_string();
        let (kill, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch(
            child,
            kill_rx,
            id.clone(),
            Arc::clone(&self.jobs),
            sink,
        ));

        tracing::info!(job = %id, command = %command, sink = %sink_path.display(), "Background job started");
        jobs.insert(
            id.clone(),
            JobEntry {
                command: command.to_string(),
                kill,
                watcher,
            },
        );
        Ok(id)
    }

    /// Stop a job: run the optional stop command, then kill the process and
    /// drop the entry whatever the stop command did.
    pub async fn stop(&self, id: &str, stop_command: Option<&str>) -> BridgeEvent {
        if !self.jobs.lock().await.contains_key(id) {
            return job_status(id, true, JobState::Stopped, None, "Job not found");
        }

        if let Some(stop_command) = stop_command.filter(|c| !c.trim().is_empty()) {
            let spec = CommandSpec::shell(stop_command);
            match run_to_completion(self.spawner.as_ref(), &spec, self.stop_timeout).await {
                Ok(output) if output.success => {
                    tracing::debug!(job = %id, "Stop command succeeded");
                }
                Ok(output) => {
                    tracing::warn!(job = %id, code = ?output.code, "Stop command failed");
                }
                Err(e) => tracing::warn!(job = %id, error = %e, "Stop command failed"),
            }
        }

        let Some(entry) = self.jobs.lock().await.remove(id) else {
            return job_status(id, true, JobState::Stopped, None, "Job already exited");
        };

        let _ = entry.kill.send(());
        if let Err(e) = entry.watcher.await {
            tracing::warn!(job = %id, error = %e, "Job watcher failed");
        }
        tracing::info!(job = %id, command = %entry.command, "Background job stopped");
        job_status(id, true, JobState::Stopped, None, "Job stopped")
    }

    /// Ids of running jobs.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

async fn watch(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    id: String,
    jobs: JobTable,
    sink: EventSink,
) {
    tokio::select! {
        status = child.wait() => {
            jobs.lock().await.remove(&id);
            let (code, message) = match status {
                Ok(status) => (status.code(), format!("Job exited: {status}")),
                Err(e) => (None, format!("Job lost: {e}")),
            };
            tracing::info!(job = %id, code = ?code, "Background job exited");
            sink.emit(job_status(
                id,
                code == Some(0),
                JobState::Exited,
                code,
                message,
            ));
        }
        _ = kill => {
            if let Err(e) = child.kill().await {
                tracing::warn!(job = %id, error = %e, "Failed to kill job");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SystemSpawner;

    async fn registry(dir: &std::path::Path) -> JobRegistry {
        let ws = WorkspaceGateway::open(dir).await.unwrap();
        JobRegistry::new(Arc::new(SystemSpawner), Arc::new(ws), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_stop_unknown_job() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = registry(dir.path()).await;

        let event = jobs.stop("missing", Some("false")).await;
        assert_eq!(
            event,
            job_status("missing", true, JobState::Stopped, None, "Job not found")
        );
    }

    #[tokio::test]
    async fn test_job_writes_sink_and_reports_exit() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = registry(dir.path()).await;
        let (sink, mut events) = EventSink::channel();

        let id = jobs
            .start("echo captured; echo err >&2; exit 3", "cap.log", sink)
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            job_status(id, false, JobState::Exited, Some(3), "Job exited: exit status: 3")
        );
        assert!(jobs.ids().await.is_empty());

        let log = std::fs::read_to_string(dir.path().join("jobs/cap.log")).unwrap();
        assert!(log.contains("captured"));
        assert!(log.contains("err"));
    }

    #[tokio::test]
    async fn test_stop_kills_even_if_stop_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = registry(dir.path()).await;
        let (sink, mut events) = EventSink::channel();

        let id = jobs.start("sleep 30", "sleep.log", sink).await.unwrap();
        assert_eq!(jobs.ids().await, vec![id.clone()]);

        let event = jobs.stop(&id, Some("exit 1")).await;
        assert!(matches!(
            event,
            BridgeEvent::BackgroundJobStatus {
                status: JobState::Stopped,
                success: true,
                ..
            }
        ));
        assert!(jobs.ids().await.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sink_outside_workspace_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = registry(dir.path()).await;
        let (sink, _events) = EventSink::channel();

        let err = jobs.start("true", "../../x.log", sink).await.unwrap_err();
        assert!(matches!(err, JobError::Workspace(WorkspaceError::SandboxViolation(_))));
        assert!(jobs.ids().await.is_empty());
    }
}
