//! Auto-recovery for unreachable targets, and the candidate combinator.

use std::future::Future;
use std::time::Duration;

use telebridge_common::SessionState;

use crate::device::{DeviceError, DeviceTool};
use crate::events::EventSink;

/// Run `attempt` on each candidate in order.
///
/// Returns the first success, or every error in candidate order (the last
/// one is the most specific).
pub async fn try_candidates<C, T, E, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<T, Vec<E>>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut errors = Vec::new();
    for candidate in candidates {
        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(e) => errors.push(e),
        }
    }
    Err(errors)
}

/// One bounded reconnect-and-retry cycle around device operations.
#[derive(Debug, Clone)]
pub struct AutoRecovery {
    tool: DeviceTool,
    fallback: String,
    reconnect_timeout: Duration,
}

impl AutoRecovery {
    pub fn new(tool: DeviceTool, fallback: impl Into<String>, reconnect_timeout: Duration) -> Self {
        Self {
            tool,
            fallback: fallback.into(),
            reconnect_timeout,
        }
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Run `op(false)`; on target-not-found, reconnect the fallback address
    /// and run `op(true)` once. The retry's outcome is returned as is.
    pub async fn run<T, F, Fut>(&self, sink: &EventSink, mut op: F) -> Result<T, DeviceError>
    where
        F: FnMut(bool) -> Fut,
        Fut: Future<Output = Result<T, DeviceError>>,
    {
        match op(false).await {
            Err(e) if e.is_target_not_found() => {
                tracing::warn!(fallback = %self.fallback, error = %e, "Target not found, reconnecting");
                sink.status(
                    SessionState::Reconnecting,
                    format!("Target not found, reconnecting {}", self.fallback),
                );
                self.reconnect().await;
                op(true).await
            }
            other => other,
        }
    }

    async fn reconnect(&self) {
        if let Err(e) = self.tool.disconnect(&self.fallback).await {
            tracing::debug!(fallback = %self.fallback, error = %e, "Disconnect before reconnect failed");
        }
        match self.tool.connect(&self.fallback, self.reconnect_timeout).await {
            Ok(()) => tracing::info!(fallback = %self.fallback, "Reconnected fallback address"),
            Err(e) => tracing::warn!(fallback = %self.fallback, error = %e, "Reconnect failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ScriptedSpawner;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use telebridge_common::BridgeEvent;

    fn recovery() -> AutoRecovery {
        let tool = DeviceTool::new(
            Arc::new(ScriptedSpawner::new("exit 0")),
            "sdb",
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        AutoRecovery::new(tool, "192.168.250.250:26101", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_try_candidates_first_success() {
        let result: Result<u32, Vec<String>> = try_candidates([1u32, 2, 3], |n| async move {
            if n >= 2 { Ok(n * 10) } else { Err(format!("no {n}")) }
        })
        .await;
        assert_eq!(result, Ok(20));

        let result: Result<u32, Vec<String>> =
            try_candidates([1u32, 2], |n| async move { Err(format!("no {n}")) }).await;
        assert_eq!(result, Err(vec!["no 1".to_string(), "no 2".to_string()]));
    }

    #[tokio::test]
    async fn test_retries_exactly_once() {
        let (sink, mut events) = EventSink::channel();
        let calls = AtomicUsize::new(0);

        let result: Result<(), DeviceError> = recovery()
            .run(&sink, |retried| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_eq!(retried, n == 1);
                    Err(DeviceError::TargetNotFound("device not found".to_string()))
                }
            })
            .await;

        assert!(result.unwrap_err().is_target_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let event = events.try_recv().unwrap();
        assert!(matches!(
            event,
            BridgeEvent::SessionStatus {
                status: SessionState::Reconnecting,
                ..
            }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let (sink, mut events) = EventSink::channel();
        let calls = AtomicUsize::new(0);

        let result: Result<(), DeviceError> = recovery()
            .run(&sink, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(DeviceError::Failed {
                        command: "sdb".to_string(),
                        message: "boom".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_retry_success_is_returned() {
        let (sink, _events) = EventSink::channel();
        let result = recovery()
            .run(&sink, |retried| async move {
                if retried {
                    Ok("listing")
                } else {
                    Err(DeviceError::TargetNotFound("target disconnected".to_string()))
                }
            })
            .await;
        assert_eq!(result.unwrap(), "listing");
    }

    #[tokio::test]
    async fn test_failed_reconnect_still_retries_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let script = format!(
            r#"echo "$*" >> '{}'
            case "$*" in
                *" connect "*) echo "failed to connect to $3" ; exit 1 ;;
            esac"#,
            log.display()
        );
        let tool = DeviceTool::new(
            Arc::new(ScriptedSpawner::new(script)),
            "sdb",
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let recovery = AutoRecovery::new(tool, "192.168.250.250:26101", Duration::from_secs(5));
        let (sink, _events) = EventSink::channel();
        let calls = AtomicUsize::new(0);

        let result = recovery
            .run(&sink, |retried| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if retried {
                        Ok("listing")
                    } else {
                        Err(DeviceError::TargetNotFound("device not found".to_string()))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "listing");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let calls_log = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls_log.lines().collect();
        assert_eq!(
            lines,
            vec![
                "sdb disconnect 192.168.250.250:26101",
                "sdb connect 192.168.250.250:26101",
            ]
        );
    }
}
