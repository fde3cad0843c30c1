//! The single live remote shell of a client.
//!
//! A session runs one of three drivers: SSH, the device-bridge CLI, or the
//! synthetic mock device. The driver pushes output into a [`LogPipeline`]
//! and reads keystrokes from an input channel. Opening a session first
//! tears down the previous one.

pub mod auth;
mod bridge;
mod mock;
mod ssh;

use std::sync::Arc;
use std::time::Duration;

use telebridge_common::{
    BridgeEvent, ErrorCategory, OpenSessionParams, SessionState, Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::batch::{LogPipeline, SessionLogFiles, SessionOutput};
use crate::context::BridgeServices;
use crate::device::DeviceError;
use crate::events::EventSink;
use crate::filter::KeywordFilter;
use crate::process::ProcessError;
use crate::template::resolve_command;

pub use auth::AuthBroker;

/// Upper bound on waiting for the old pipeline to flush during teardown.
const PIPELINE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that end a session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("Invalid session parameters: {0}")]
    InvalidParams(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// User-facing classification.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::AuthFailed(_) => ErrorCategory::AuthFailed,
            TransportError::ConnectionRefused(_) => ErrorCategory::ConnectionRefused,
            TransportError::HostNotFound(_) => ErrorCategory::HostNotFound,
            TransportError::Timeout(_) => ErrorCategory::Timeout,
            TransportError::Device(DeviceError::TargetNotFound(_)) => ErrorCategory::TargetNotFound,
            TransportError::Device(DeviceError::Process(ProcessError::Timeout { .. })) => {
                ErrorCategory::Timeout
            }
            _ => ErrorCategory::Other,
        }
    }
}

/// What a driver gets to talk to the client and the shell.
#[derive(Debug)]
pub(crate) struct ShellLink {
    pub sink: EventSink,
    pub output: SessionOutput,
    pub input: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Resolved command, written once the shell has settled.
    pub command: String,
    pub settle: Duration,
}

impl ShellLink {
    /// The command line to write after the settle delay, if any.
    fn command_line(&self) -> Option<String> {
        (!self.command.is_empty()).then(|| format!("{}\n", self.command))
    }
}

#[derive(Debug)]
struct ActiveSession {
    target: String,
    input: mpsc::UnboundedSender<Vec<u8>>,
    driver: JoinHandle<()>,
    pipeline: JoinHandle<()>,
}

/// Owns at most one live session.
#[derive(Debug)]
pub struct SessionController {
    services: Arc<BridgeServices>,
    sink: EventSink,
    auth: Arc<AuthBroker>,
    filter: watch::Receiver<Option<KeywordFilter>>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        services: Arc<BridgeServices>,
        sink: EventSink,
        filter: watch::Receiver<Option<KeywordFilter>>,
    ) -> Self {
        Self {
            services,
            sink,
            auth: Arc::new(AuthBroker::new()),
            filter,
            active: None,
        }
    }

    pub fn auth(&self) -> &AuthBroker {
        &self.auth
    }

    /// Target of the live session.
    pub fn live_target(&self) -> Option<&str> {
        self.active
            .as_ref()
            .filter(|a| !a.driver.is_finished())
            .map(|a| a.target.as_str())
    }

    /// Open a session, replacing any existing one.
    pub async fn open(&mut self, params: OpenSessionParams) {
        self.teardown().await;

        if let Err(e) = check_params(&params) {
            self.sink.emit(BridgeEvent::SessionError {
                message: e.to_string(),
                category: e.category(),
            });
            return;
        }

        let target = params.target();
        let command = resolve_command(&params.command, &params.tags);
        tracing::info!(
            transport = %params.transport,
            target = %target,
            command = %command,
            "Opening session"
        );

        let files = if params.save_to_file {
            let dir = self
                .services
                .config
                .log_dir(self.services.workspace.root());
            match SessionLogFiles::open(&dir, &target, params.debug).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Session log files unavailable");
                    SessionLogFiles::disabled()
                }
            }
        } else {
            SessionLogFiles::disabled()
        };

        let (pipeline, output) = LogPipeline::new(
            self.sink.clone(),
            self.services.config.flush_interval(),
            params.debug,
            files,
            self.filter.clone(),
        );
        let pipeline = tokio::spawn(pipeline.run());

        output.debug(format!("Resolved command: {command}"));

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let link = ShellLink {
            sink: self.sink.clone(),
            output,
            input: input_rx,
            command,
            settle: self.services.config.settle_delay(),
        };

        let driver = tokio::spawn(drive(
            Arc::clone(&self.services),
            params,
            link,
            Arc::clone(&self.auth),
        ));

        self.active = Some(ActiveSession {
            target,
            input: input_tx,
            driver,
            pipeline,
        });
    }

    /// Close the live session.
    pub async fn close(&mut self) {
        if !self.teardown().await {
            self.sink
                .status(SessionState::Disconnected, "No active session");
        }
    }

    /// Forward keystrokes; no-op without a live session.
    pub fn write(&self, data: &str) {
        match &self.active {
            Some(active) if active.input.send(data.as_bytes().to_vec()).is_ok() => {}
            _ => tracing::trace!("Write ignored, no live session"),
        }
    }

    /// End the current session. Returns true if one was still live.
    ///
    /// Failures are logged, never surfaced.
    pub async fn teardown(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        self.auth.cancel();

        let ActiveSession {
            target,
            input,
            driver,
            pipeline,
        } = active;
        drop(input);

        let was_live = !driver.is_finished();
        driver.abort();
        if let Err(e) = driver.await {
            if !e.is_cancelled() {
                tracing::warn!(target = %target, error = %e, "Session driver failed");
            }
        }

        match tokio::time::timeout(PIPELINE_DRAIN_TIMEOUT, pipeline).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(target = %target, error = %e, "Log pipeline failed"),
            Err(_) => tracing::warn!(target = %target, "Log pipeline did not drain"),
        }

        if was_live {
            tracing::info!(target = %target, "Session closed");
            self.sink.status(
                SessionState::Disconnected,
                format!("Session to {target} closed"),
            );
        }
        was_live
    }
}

fn check_params(params: &OpenSessionParams) -> Result<(), TransportError> {
    match params.transport {
        Transport::Ssh if params.host.as_deref().is_none_or(|h| h.trim().is_empty()) => Err(
            TransportError::InvalidParams("ssh transport needs a host".to_string()),
        ),
        Transport::Bridge
            if params
                .device_id
                .as_deref()
                .is_none_or(|d| d.trim().is_empty()) =>
        {
            Err(TransportError::InvalidParams(
                "bridge transport needs a device_id".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

async fn drive(
    services: Arc<BridgeServices>,
    params: OpenSessionParams,
    link: ShellLink,
    auth: Arc<AuthBroker>,
) {
    let sink = link.sink.clone();
    let target = params.target();
    sink.status(SessionState::Connecting, format!("Connecting to {target}"));

    let result = match params.transport {
        Transport::Ssh => {
            ssh::run(&params, link, &auth, services.config.ssh_connect_timeout()).await
        }
        Transport::Bridge if services.config.is_mock(&target) => {
            mock::run(link, &params.tags).await
        }
        Transport::Bridge => bridge::run(&services, &target, link).await,
    };

    match result {
        Ok(()) => {
            tracing::info!(target = %target, "Session ended");
            sink.status(
                SessionState::Disconnected,
                format!("Session to {target} ended"),
            );
        }
        Err(e) => {
            tracing::warn!(target = %target, error = %e, "Session failed");
            sink.emit(BridgeEvent::SessionError {
                message: e.to_string(),
                category: e.category(),
            });
            sink.status(SessionState::Disconnected, e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(transport: Transport) -> OpenSessionParams {
        OpenSessionParams {
            transport,
            host: None,
            port: None,
            device_id: None,
            username: None,
            password: None,
            debug: false,
            save_to_file: false,
            command: String::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            TransportError::AuthFailed("bad".into()).category(),
            ErrorCategory::AuthFailed
        );
        assert_eq!(
            TransportError::Device(DeviceError::TargetNotFound("x".into())).category(),
            ErrorCategory::TargetNotFound
        );
        assert_eq!(
            TransportError::Device(DeviceError::Process(ProcessError::Timeout {
                command: "sdb".into(),
                timeout: Duration::from_secs(5),
            }))
            .category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            TransportError::InvalidParams("x".into()).category(),
            ErrorCategory::Other
        );
    }

    #[test]
    fn test_check_params() {
        assert!(check_params(&params(Transport::Ssh)).is_err());
        assert!(check_params(&params(Transport::Bridge)).is_err());

        let mut p = params(Transport::Ssh);
        p.host = Some("10.0.0.7".into());
        assert!(check_params(&p).is_ok());

        let mut p = params(Transport::Bridge);
        p.device_id = Some("mock".into());
        assert!(check_params(&p).is_ok());
    }
}
