//! Process spawner adapter.
//!
//! Every external command the bridge runs (device tool, host shell,
//! background jobs) goes through a [`ProcessSpawner`], so tests can swap
//! the real binaries for scripts.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// Errors from running an external command.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` timed out after {}ms", .timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// What to run and how to wire its streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Pipe stdin so the caller can write to the process.
    pub stdin: bool,
    /// Append stdout and stderr to this file instead of piping them.
    pub sink: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: false,
            sink: None,
        }
    }

    /// `sh -c <script>`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_stdin(mut self) -> Self {
        self.stdin = true;
        self
    }

    pub fn with_sink(mut self, path: impl Into<PathBuf>) -> Self {
        self.sink = Some(path.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Starts external processes.
pub trait ProcessSpawner: Send + Sync + fmt::Debug {
    /// Start the process described by `spec`.
    ///
    /// Implementations must set kill-on-drop so dropping the [`Child`]
    /// terminates the process.
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Child>;
}

fn configure(cmd: &mut Command, spec: &CommandSpec) -> io::Result<()> {
    cmd.kill_on_drop(true);
    cmd.stdin(if spec.stdin {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    match &spec.sink {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let err = file.try_clone()?;
            cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err));
        }
        None => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
    }
    Ok(())
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Child> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        configure(&mut cmd, spec)?;
        cmd.spawn()
    }
}

/// Runs every command through one shell script.
///
/// The script sees the requested program as `$1` and its arguments as
/// `$2...`, so a `case "$*" in ...` block can fake any tool.
#[derive(Debug, Clone)]
pub struct ScriptedSpawner {
    script: String,
}

impl ScriptedSpawner {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Child> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.script)
            .arg("scripted")
            .arg(&spec.program)
            .args(&spec.args);
        configure(&mut cmd, spec)?;
        cmd.spawn()
    }
}

/// Collected result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}{}", self.stdout, self.stderr),
        }
    }
}

/// Run a command to completion, collecting its output.
///
/// The process is killed when the timeout elapses.
pub async fn run_to_completion(
    spawner: &dyn ProcessSpawner,
    spec: &CommandSpec,
    timeout: Duration,
) -> Result<ProcessOutput, ProcessError> {
    let command = spec.to_string();
    tracing::trace!(command = %command, "Running command");

    let child = spawner.spawn(spec).map_err(|source| ProcessError::Spawn {
        command: command.clone(),
        source,
    })?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(source)) => Err(ProcessError::Io { command, source }),
        Err(_) => Err(ProcessError::Timeout { command, timeout }),
    }
}

/// Output of [`run_bounded`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    pub output: ProcessOutput,
    /// The cap was reached and the process killed.
    pub truncated: bool,
}

/// Read once from `stream`, or wait forever once it is closed.
pub(crate) async fn read_chunk<R>(stream: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn collect_bounded(child: &mut Child, max_bytes: usize) -> io::Result<BoundedOutput> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut truncated = false;

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf) => match read? {
                0 => stdout = None,
                n => out.extend_from_slice(&out_buf[..n]),
            },
            read = read_chunk(&mut stderr, &mut err_buf) => match read? {
                0 => stderr = None,
                n => err.extend_from_slice(&err_buf[..n]),
            },
        }

        if out.len() + err.len() > max_bytes {
            truncated = true;
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Failed to kill process at output cap");
            }
            break;
        }
    }

    let status = child.wait().await?;
    Ok(BoundedOutput {
        output: ProcessOutput {
            success: status.success(),
            code: status.code(),
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
        },
        truncated,
    })
}

/// Run a command, keeping at most a little over `max_bytes` of output.
///
/// stdout and stderr are read as they arrive. Once together they pass
/// `max_bytes` the process is killed and what was read is returned.
pub async fn run_bounded(
    spawner: &dyn ProcessSpawner,
    spec: &CommandSpec,
    timeout: Duration,
    max_bytes: usize,
) -> Result<BoundedOutput, ProcessError> {
    let command = spec.to_string();
    tracing::trace!(command = %command, max_bytes, "Running bounded command");

    let mut child = spawner.spawn(spec).map_err(|source| ProcessError::Spawn {
        command: command.clone(),
        source,
    })?;

    match tokio::time::timeout(timeout, collect_bounded(&mut child, max_bytes)).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(source)) => Err(ProcessError::Io { command, source }),
        Err(_) => Err(ProcessError::Timeout { command, timeout }),
    }
}
