//! Screen capture and template matching.
//!
//! Capturing runs a dump command on the device, then pulls the image. The
//! capture candidates are tried in order until one produces a file. A
//! match decodes both images to 8-bit grayscale and runs normalised
//! cross-correlation; decoding and matching run on the blocking pool.

pub mod ncc;

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{GrayImage, ImageFormat, Luma};
use telebridge_common::{MatchReport, Rect};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::CaptureCandidate;
use crate::device::{DeviceError, DeviceTool};
use crate::events::EventSink;
use crate::recovery::{AutoRecovery, try_candidates};
use crate::workspace::{WorkspaceError, WorkspaceGateway};

pub use ncc::{NccError, NccMatch, match_template};

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Match(#[from] NccError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Matcher task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A local capture file, deleted on drop.
///
/// Dropped inside the runtime, the file is removed on the blocking pool.
#[derive(Debug)]
pub struct CaptureArtifact {
    path: PathBuf,
    removed: bool,
}

fn remove_capture(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove capture");
        }
    }
}

impl CaptureArtifact {
    fn scratch() -> Self {
        let name = format!("telebridge_capture_{}.png", uuid::Uuid::new_v4());
        Self {
            path: std::env::temp_dir().join(name),
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file on the current thread. Blocking.
    pub fn remove(mut self) {
        self.removed = true;
        remove_capture(&self.path);
    }
}

impl Drop for CaptureArtifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || remove_capture(&path));
            }
            Err(_) => remove_capture(&path),
        }
    }
}

/// Outcome of a wait-for-match loop.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitOutcome {
    pub success: bool,
    pub timed_out: bool,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub report: Option<MatchReport>,
    pub message: String,
}

fn decode_gray(path: &Path) -> Result<GrayImage, MatchError> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| MatchError::Decode {
            path: path.display().to_string(),
            source,
        })
}

fn report(hit: NccMatch, template: &GrayImage, threshold: f64) -> MatchReport {
    MatchReport {
        success: hit.score >= threshold,
        confidence: hit.score,
        bounds: Rect {
            x: hit.x,
            y: hit.y,
            width: template.width(),
            height: template.height(),
        },
    }
}

/// Synthetic screen of the mock device: a gradient with a textured badge.
pub fn mock_screen() -> GrayImage {
    GrayImage::from_fn(200, 150, |x, y| {
        if (120..160).contains(&x) && (40..80).contains(&y) {
            Luma([((x * 13 + y * 29) % 200 + 40) as u8])
        } else {
            Luma([((x + y) / 4) as u8])
        }
    })
}

/// Capture, pull and match against the device screen.
#[derive(Debug, Clone)]
pub struct ScreenMatcher {
    tool: DeviceTool,
    recovery: AutoRecovery,
    candidates: Vec<CaptureCandidate>,
    threshold: f64,
    mock_device_id: String,
}

impl ScreenMatcher {
    pub fn new(
        tool: DeviceTool,
        recovery: AutoRecovery,
        candidates: Vec<CaptureCandidate>,
        threshold: f64,
        mock_device_id: impl Into<String>,
    ) -> Self {
        Self {
            tool,
            recovery,
            candidates,
            threshold,
            mock_device_id: mock_device_id.into(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Capture the device screen into `local`.
    pub async fn capture_to(
        &self,
        sink: &EventSink,
        device_id: &str,
        local: &Path,
    ) -> Result<(), MatchError> {
        if device_id == self.mock_device_id {
            let local = local.to_path_buf();
            return tokio::task::spawn_blocking(move || {
                mock_screen()
                    .save_with_format(&local, ImageFormat::Png)
                    .map_err(|e| MatchError::Capture(e.to_string()))
            })
            .await?;
        }

        let result = try_candidates(&self.candidates, |candidate| async move {
            let command = candidate.command.replace("{path}", &candidate.remote_path);
            self.recovery
                .run(sink, |_| self.tool.shell(device_id, &command))
                .await?;
            self.tool
                .pull(device_id, &candidate.remote_path, local)
                .await?;
            Ok::<(), DeviceError>(())
        })
        .await;

        result.map_err(|errors| {
            for e in &errors {
                tracing::debug!(device = %device_id, error = %e, "Capture candidate failed");
            }
            let last = errors
                .last()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no capture method configured".to_string());
            MatchError::Capture(last)
        })
    }

    /// Capture into `captures/screen_<timestamp>.png` in the workspace.
    ///
    /// Returns the workspace-relative path.
    pub async fn capture_screen(
        &self,
        sink: &EventSink,
        workspace: &WorkspaceGateway,
        device_id: &str,
    ) -> Result<String, MatchError> {
        let name = format!(
            "captures/screen_{}.png",
            chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let path = workspace.resolve(&name).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.capture_to(sink, device_id, &path).await?;
        Ok(workspace.display_path(&path))
    }

    /// Match a template against a screen image.
    pub async fn match_files(&self, screen: PathBuf, template: PathBuf) -> Result<MatchReport, MatchError> {
        let threshold = self.threshold;
        tokio::task::spawn_blocking(move || {
            let screen = decode_gray(&screen)?;
            let template = decode_gray(&template)?;
            let hit = match_template(&screen, &template)?;
            Ok(report(hit, &template, threshold))
        })
        .await?
    }

    /// Poll capture and match until the template shows up or `timeout`
    /// passes.
    ///
    /// The template is decoded once. Each attempt captures into a scratch
    /// file that is removed when the attempt ends, whatever its outcome.
    pub async fn wait_for_match(
        &self,
        sink: &EventSink,
        device_id: &str,
        template_path: PathBuf,
        timeout: Duration,
        poll_interval: Duration,
    ) -> WaitOutcome {
        let started = Instant::now();
        let deadline = started + timeout;
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let template = match tokio::task::spawn_blocking(move || decode_gray(&template_path)).await {
            Ok(Ok(template)) => std::sync::Arc::new(template),
            Ok(Err(e)) => return failed(0, elapsed_ms(), e.to_string()),
            Err(e) => return failed(0, elapsed_ms(), e.to_string()),
        };

        let mut attempts = 0u32;
        let mut best: Option<MatchReport> = None;
        let mut last_error: Option<String> = None;

        loop {
            attempts += 1;
            let artifact = CaptureArtifact::scratch();

            match self.capture_to(sink, device_id, artifact.path()).await {
                Ok(()) => {
                    let template = std::sync::Arc::clone(&template);
                    let threshold = self.threshold;
                    // The artifact moves into the blocking task and is
                    // removed there once the screen is decoded.
                    let attempt = tokio::task::spawn_blocking(move || {
                        let screen = decode_gray(artifact.path());
                        artifact.remove();
                        let screen = screen?;
                        let hit = match_template(&screen, &template)?;
                        Ok::<_, MatchError>(report(hit, &template, threshold))
                    })
                    .await;

                    match attempt {
                        Ok(Ok(found)) if found.success => {
                            return WaitOutcome {
                                success: true,
                                timed_out: false,
                                attempts,
                                elapsed_ms: elapsed_ms(),
                                report: Some(found),
                                message: format!(
                                    "Template found with confidence {:.3}",
                                    found.confidence
                                ),
                            };
                        }
                        Ok(Ok(found)) => {
                            if best.is_none_or(|b| found.confidence > b.confidence) {
                                best = Some(found);
                            }
                        }
                        // Template larger than the screen never resolves.
                        Ok(Err(e @ MatchError::Match(_))) => {
                            return failed(attempts, elapsed_ms(), e.to_string());
                        }
                        Ok(Err(e)) => last_error = Some(e.to_string()),
                        Err(e) => last_error = Some(e.to_string()),
                    }
                }
                Err(e) => {
                    tracing::debug!(device = %device_id, attempt = attempts, error = %e, "Capture attempt failed");
                    last_error = Some(e.to_string());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let mut message = format!(
                    "Template not found within {}ms after {} attempts",
                    timeout.as_millis(),
                    attempts
                );
                if let Some(e) = &last_error {
                    message.push_str(&format!(" (last error: {e})"));
                }
                return WaitOutcome {
                    success: false,
                    timed_out: true,
                    attempts,
                    elapsed_ms: elapsed_ms(),
                    report: best,
                    message,
                };
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

fn failed(attempts: u32, elapsed_ms: u64, message: String) -> WaitOutcome {
    WaitOutcome {
        success: false,
        timed_out: false,
        attempts,
        elapsed_ms,
        report: None,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ScriptedSpawner;
    use image::imageops;
    use std::sync::Arc;

    fn matcher(script: &str) -> ScreenMatcher {
        let tool = DeviceTool::new(
            Arc::new(ScriptedSpawner::new(script)),
            "sdb",
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let recovery = AutoRecovery::new(tool.clone(), "192.168.250.250:26101", Duration::from_secs(5));
        ScreenMatcher::new(
            tool,
            recovery,
            crate::config::DeviceConfig::default().capture,
            0.8,
            "mock",
        )
    }

    #[test]
    fn test_artifact_removed_on_drop() {
        let artifact = CaptureArtifact::scratch();
        std::fs::write(artifact.path(), b"png").unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_artifact_dropped_in_runtime_is_removed() {
        let artifact = CaptureArtifact::scratch();
        tokio::fs::write(artifact.path(), b"png").await.unwrap();
        let path = artifact.path().to_path_buf();
        drop(artifact);

        for _ in 0..100 {
            if !tokio::fs::try_exists(&path).await.unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("capture {} was not removed", path.display());
    }

    #[test]
    fn test_report_threshold() {
        let template = GrayImage::new(12, 7);
        let below = report(NccMatch { x: 3, y: 4, score: 0.79 }, &template, 0.8);
        assert!(!below.success);

        let at = report(NccMatch { x: 3, y: 4, score: 0.8 }, &template, 0.8);
        assert!(at.success);
        assert_eq!(
            at.bounds,
            Rect {
                x: 3,
                y: 4,
                width: 12,
                height: 7
            }
        );
    }

    #[tokio::test]
    async fn test_match_files_finds_badge() {
        let dir = tempfile::tempdir().unwrap();
        let screen_path = dir.path().join("screen.png");
        let template_path = dir.path().join("badge.png");

        let screen = mock_screen();
        screen.save(&screen_path).unwrap();
        imageops::crop_imm(&screen, 125, 45, 30, 30)
            .to_image()
            .save(&template_path)
            .unwrap();

        let report = matcher("exit 0")
            .match_files(screen_path, template_path)
            .await
            .unwrap();
        assert!(report.success);
        assert!(report.confidence > 0.99);
        assert_eq!((report.bounds.x, report.bounds.y), (125, 45));
        assert_eq!((report.bounds.width, report.bounds.height), (30, 30));
    }

    #[tokio::test]
    async fn test_match_files_reports_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.png");
        std::fs::write(&bogus, b"not a png").unwrap();

        let err = matcher("exit 0")
            .match_files(bogus.clone(), bogus)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_capture_falls_back_to_second_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("pulled.png");
        let script = r#"case "$*" in
            *"shell screenshot"*) echo 'screenshot: not found' >&2; exit 127 ;;
            *pull*) for last; do :; done; printf 'png' > "$last" ;;
        esac"#;

        matcher(script)
            .capture_to(&EventSink::channel().0, "emulator-26101", &local)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_wait_for_match_on_mock_device() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("badge.png");
        imageops::crop_imm(&mock_screen(), 120, 40, 40, 40)
            .to_image()
            .save(&template_path)
            .unwrap();

        let outcome = matcher("exit 0")
            .wait_for_match(
                &EventSink::channel().0,
                "mock",
                template_path,
                Duration::from_secs(5),
                Duration::from_millis(50),
            )
            .await;
        assert!(outcome.success, "{}", outcome.message);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_wait_for_match_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("noise.png");
        GrayImage::from_fn(16, 16, |x, y| Luma([if (x ^ y) & 1 == 0 { 0 } else { 255 }]))
            .save(&template_path)
            .unwrap();

        let outcome = matcher("exit 0")
            .wait_for_match(
                &EventSink::channel().0,
                "mock",
                template_path,
                Duration::from_millis(120),
                Duration::from_millis(50),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert!(outcome.attempts >= 2);
    }

    #[tokio::test]
    async fn test_wait_for_match_uses_whole_window() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("noise.png");
        GrayImage::from_fn(16, 16, |x, y| Luma([if (x ^ y) & 1 == 0 { 0 } else { 255 }]))
            .save(&template_path)
            .unwrap();

        // The poll interval is longer than the window: the loop still makes
        // a last attempt right at the deadline.
        let outcome = matcher("exit 0")
            .wait_for_match(
                &EventSink::channel().0,
                "mock",
                template_path,
                Duration::from_secs(1),
                Duration::from_secs(5),
            )
            .await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.elapsed_ms >= 1_000);
        assert!(outcome.elapsed_ms < 5_000);
    }
}
