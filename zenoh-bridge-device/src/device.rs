//! Device-bridge CLI wrapper.
//!
//! All bridge-transport operations shell out to the vendor tool (`sdb` by
//! default): device listing, connect/disconnect, one-shot shell commands,
//! file pulls and the interactive shell used by sessions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use telebridge_common::{DeviceInfo, DirEntry};
use thiserror::Error;

use crate::parser::{parse_device_list, parse_ls_long};
use crate::process::{CommandSpec, ProcessError, ProcessOutput, ProcessSpawner, run_to_completion};
use crate::recovery::try_candidates;

/// Marker echoed back by a successful probe.
pub const PROBE_MARKER: &str = "telebridge-probe";

static TARGET_NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)device not found|target not found|device '[^']*' not found|no devices/emulators found|target disconnected|device offline",
    )
    .expect("valid regex")
});

/// Does this tool output mean the target is unreachable?
pub fn is_target_not_found(text: &str) -> bool {
    TARGET_NOT_FOUND.is_match(text)
}

/// Errors from the device tool.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("`{command}` failed: {message}")]
    Failed { command: String, message: String },
}

impl DeviceError {
    pub fn is_target_not_found(&self) -> bool {
        matches!(self, DeviceError::TargetNotFound(_))
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Handle on the vendor device-bridge CLI.
#[derive(Debug, Clone)]
pub struct DeviceTool {
    spawner: Arc<dyn ProcessSpawner>,
    program: String,
    command_timeout: Duration,
    probe_timeout: Duration,
}

impl DeviceTool {
    pub fn new(
        spawner: Arc<dyn ProcessSpawner>,
        program: impl Into<String>,
        command_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            spawner,
            program: program.into(),
            command_timeout,
            probe_timeout,
        }
    }

    /// Pick the first usable binary among the configured one and `sdb`.
    ///
    /// Falls back to the configured name when none answers, so later
    /// calls report the real spawn error.
    pub async fn resolve(
        spawner: Arc<dyn ProcessSpawner>,
        configured: &str,
        command_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let mut candidates = vec![configured.to_string()];
        if configured != "sdb" {
            candidates.push("sdb".to_string());
        }

        let found = try_candidates(candidates, |program| {
            let spawner = Arc::clone(&spawner);
            async move {
                let spec = CommandSpec::new(program.as_str()).arg("version");
                run_to_completion(spawner.as_ref(), &spec, probe_timeout)
                    .await
                    .map(|_| program)
            }
        })
        .await;

        let program = match found {
            Ok(program) => {
                tracing::info!(tool = %program, "Using device bridge tool");
                program
            }
            Err(errors) => {
                for e in &errors {
                    tracing::warn!(error = %e, "Device bridge tool candidate unusable");
                }
                configured.to_string()
            }
        };

        Self::new(spawner, program, command_timeout, probe_timeout)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn spawner(&self) -> &Arc<dyn ProcessSpawner> {
        &self.spawner
    }

    /// Run the tool with `args`, classifying failures.
    ///
    /// Output is checked for target-not-found text even on a zero exit
    /// status, since the tool does not always set one.
    pub async fn run<I, S>(&self, args: I, timeout: Duration) -> Result<ProcessOutput, DeviceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = CommandSpec::new(self.program.as_str()).args(args);
        let output = run_to_completion(self.spawner.as_ref(), &spec, timeout).await?;
        let combined = output.combined();

        if is_target_not_found(&combined) {
            return Err(DeviceError::TargetNotFound(combined.trim().to_string()));
        }
        if !output.success {
            return Err(DeviceError::Failed {
                command: spec.to_string(),
                message: combined.trim().to_string(),
            });
        }
        Ok(output)
    }

    pub async fn devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let output = self.run(["devices"], self.command_timeout).await?;
        Ok(parse_device_list(&output.stdout))
    }

    pub async fn connect(&self, address: &str, timeout: Duration) -> Result<(), DeviceError> {
        let output = self.run(["connect", address], timeout).await?;
        let text = output.combined().to_lowercase();
        if text.contains("failed") || text.contains("unable") {
            return Err(DeviceError::Failed {
                command: format!("{} connect {}", self.program, address),
                message: output.combined().trim().to_string(),
            });
        }
        Ok(())
    }

    pub async fn disconnect(&self, address: &str) -> Result<(), DeviceError> {
        self.run(["disconnect", address], self.command_timeout)
            .await
            .map(|_| ())
    }

    /// Run one shell command on the device, returning its stdout.
    pub async fn shell(&self, device_id: &str, command: &str) -> Result<String, DeviceError> {
        let output = self
            .run(["-s", device_id, "shell", command], self.command_timeout)
            .await?;
        Ok(output.stdout)
    }

    /// Fast reachability check with its own short timeout.
    pub async fn probe(&self, device_id: &str) -> Result<(), DeviceError> {
        let output = self
            .run(
                ["-s", device_id, "shell", "echo", PROBE_MARKER],
                self.probe_timeout,
            )
            .await?;
        if output.stdout.contains(PROBE_MARKER) {
            Ok(())
        } else {
            Err(DeviceError::Failed {
                command: format!("{} -s {} shell echo {}", self.program, device_id, PROBE_MARKER),
                message: format!("unexpected probe reply: {}", output.combined().trim()),
            })
        }
    }

    pub async fn pull(&self, device_id: &str, remote: &str, local: &Path) -> Result<(), DeviceError> {
        let local = local.to_string_lossy().into_owned();
        self.run(
            ["-s", device_id, "pull", remote, local.as_str()],
            self.command_timeout,
        )
        .await
        .map(|_| ())
    }

    /// `ls -l` a device directory.
    pub async fn list_dir(&self, device_id: &str, path: &str) -> Result<Vec<DirEntry>, DeviceError> {
        let stdout = self
            .shell(device_id, &format!("ls -l {}", shell_quote(path)))
            .await?;
        Ok(parse_ls_long(&stdout))
    }

    /// Command line for `<tool> -s <id> shell [command]`, for long-running streams.
    pub fn shell_spec(&self, device_id: &str, command: Option<&str>) -> CommandSpec {
        let spec = CommandSpec::new(self.program.as_str()).args(["-s", device_id, "shell"]);
        match command {
            Some(command) => spec.arg(command),
            None => spec,
        }
    }
}
