//! Unsandboxed host command execution.
//!
//! Host commands are not confined to the workspace; they run with the
//! bridge's own privileges.

use std::sync::Arc;
use std::time::Duration;

use crate::process::{CommandSpec, ProcessError, ProcessSpawner, run_bounded};

const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// Result of one host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutput {
    pub success: bool,
    pub output: String,
}

/// Cut `text` to at most `max_bytes` on a character boundary.
pub fn truncate_output(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
    text
}

/// Runs `sh -c <command>` on the bridge host.
#[derive(Debug, Clone)]
pub struct HostExecutor {
    spawner: Arc<dyn ProcessSpawner>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl HostExecutor {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            spawner,
            timeout,
            max_output_bytes,
        }
    }

    pub async fn run(&self, command: &str) -> HostOutput {
        tracing::info!(command = %command, "Running host command");
        let spec = CommandSpec::shell(command);

        match run_bounded(self.spawner.as_ref(), &spec, self.timeout, self.max_output_bytes).await {
            Ok(bounded) => {
                if bounded.truncated {
                    tracing::info!(command = %command, "Host command output cap reached, process killed");
                }
                HostOutput {
                    success: bounded.output.success,
                    output: truncate_output(bounded.output.combined(), self.max_output_bytes),
                }
            }
            Err(e @ ProcessError::Timeout { .. }) => {
                tracing::warn!(command = %command, "Host command timed out");
                HostOutput {
                    success: false,
                    output: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(command = %command, error = %e, "Host command failed");
                HostOutput {
                    success: false,
                    output: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::SystemSpawner;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_output("short".to_string(), 10), "short");

        let truncated = truncate_output("ééé".to_string(), 3);
        assert!(truncated.starts_with('é'));
        assert!(!truncated.starts_with("éé"));
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_run_reports_status_and_output() {
        let host = HostExecutor::new(Arc::new(SystemSpawner), Duration::from_secs(5), 1024);

        let ok = host.run("echo hello").await;
        assert!(ok.success);
        assert_eq!(ok.output, "hello\n");

        let failed = host.run("echo bad >&2; exit 2").await;
        assert!(!failed.success);
        assert_eq!(failed.output, "bad\n");
    }

    #[test]
    fn test_run_truncates_large_output() {
        let host = HostExecutor::new(Arc::new(SystemSpawner), Duration::from_secs(5), 16);
        let result = tokio_test::block_on(host.run("printf '%0100d' 0"));
        assert_eq!(result.output, format!("{}{}", "0".repeat(16), TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_endless_output_stops_at_cap() {
        let host = HostExecutor::new(Arc::new(SystemSpawner), Duration::from_secs(30), 1024);
        let started = std::time::Instant::now();
        let result = host.run("yes").await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.output.starts_with("y\ny\n"));
        assert!(result.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.output.len(), 1024 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let host = HostExecutor::new(Arc::new(SystemSpawner), Duration::from_millis(100), 1024);
        let result = host.run("sleep 5").await;
        assert!(!result.success);
        assert!(result.output.contains("timed out"));
    }
}
