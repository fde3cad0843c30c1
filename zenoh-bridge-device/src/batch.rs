//! Log batching pipeline.
//!
//! Shell output arrives in many small chunks. The pipeline appends each
//! chunk to a [`LogBatch`]; the first chunk of an empty batch arms a flush
//! timer, and when it fires the whole batch goes out as one `log_chunk`
//! event. With file logging on, every raw chunk is also appended to the
//! session log file as it arrives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use telebridge_common::BridgeEvent;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::events::EventSink;
use crate::filter::{KeywordFilter, LineGate};

/// Append-only text accumulator, cleared on every flush.
#[derive(Debug, Default)]
pub struct LogBatch {
    text: String,
}

impl LogBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns true if the batch was empty before, i.e. a
    /// flush timer must be armed.
    pub fn push(&mut self, chunk: &str) -> bool {
        let was_empty = self.text.is_empty();
        self.text.push_str(chunk);
        was_empty && !chunk.is_empty()
    }

    /// Take the accumulated text, leaving the batch empty.
    pub fn take(&mut self) -> Option<String> {
        (!self.text.is_empty()).then(|| std::mem::take(&mut self.text))
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// What a transport feeds into the pipeline.
#[derive(Debug)]
pub enum PipelineInput {
    /// Shell output.
    Output(String),
    /// Transport diagnostics.
    Debug(String),
}

/// Sending half handed to the transport driving a session.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    tx: mpsc::UnboundedSender<PipelineInput>,
    debug: bool,
}

impl SessionOutput {
    pub fn output(&self, text: impl Into<String>) {
        let _ = self.tx.send(PipelineInput::Output(text.into()));
    }

    /// Record a diagnostic line; ignored unless debug logging is on.
    pub fn debug(&self, text: impl Into<String>) {
        if self.debug {
            let _ = self.tx.send(PipelineInput::Debug(text.into()));
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }
}

#[cfg(test)]
impl SessionOutput {
    /// An output read directly by a test instead of a pipeline.
    pub(crate) fn detached(debug: bool) -> (Self, mpsc::UnboundedReceiver<PipelineInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, debug }, rx)
    }
}

/// Files a session appends to when file logging is on.
#[derive(Debug, Default)]
pub struct SessionLogFiles {
    output: Option<File>,
    debug: Option<File>,
    paths: Vec<PathBuf>,
}

/// Replace characters that do not belong in a file name.
fn sanitize_target(target: &str) -> String {
    let cleaned: String = target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

impl SessionLogFiles {
    /// No files.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open `<dir>/<target>_<timestamp>.log` and, with `debug`, the
    /// matching `.debug.log`, both in append mode.
    pub async fn open(dir: &Path, target: &str, debug: bool) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let stem = format!(
            "{}_{}",
            sanitize_target(target),
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );

        let output_path = dir.join(format!("{stem}.log"));
        let output = open_append(&output_path).await?;
        let mut paths = vec![output_path];

        let debug = if debug {
            let debug_path = dir.join(format!("{stem}.debug.log"));
            let file = open_append(&debug_path).await?;
            paths.push(debug_path);
            Some(file)
        } else {
            None
        };

        Ok(Self {
            output: Some(output),
            debug,
            paths,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    async fn write(file: &mut Option<File>, text: &str) {
        if let Some(f) = file {
            if let Err(e) = f.write_all(text.as_bytes()).await {
                tracing::warn!(error = %e, "Session log write failed, disabling file");
                *file = None;
            }
        }
    }

    async fn close(&mut self) {
        for file in [self.output.as_mut(), self.debug.as_mut()].into_iter().flatten() {
            if let Err(e) = file.flush().await {
                tracing::warn!(error = %e, "Failed to flush session log");
            }
        }
        self.output = None;
        self.debug = None;
    }
}

/// Receiving half: batches output and emits events.
#[derive(Debug)]
pub struct LogPipeline {
    rx: mpsc::UnboundedReceiver<PipelineInput>,
    sink: EventSink,
    flush_interval: Duration,
    files: SessionLogFiles,
    filter: watch::Receiver<Option<KeywordFilter>>,
}

impl LogPipeline {
    /// Create a pipeline and the output handle a transport writes to.
    pub fn new(
        sink: EventSink,
        flush_interval: Duration,
        debug: bool,
        files: SessionLogFiles,
        filter: watch::Receiver<Option<KeywordFilter>>,
    ) -> (Self, SessionOutput) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                sink,
                flush_interval,
                files,
                filter,
            },
            SessionOutput { tx, debug },
        )
    }

    /// Run until every [`SessionOutput`] is dropped, then flush what is
    /// left and close the files.
    pub async fn run(mut self) {
        let mut batch = LogBatch::new();
        let mut gate = LineGate::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                input = self.rx.recv() => match input {
                    Some(PipelineInput::Output(chunk)) => {
                        SessionLogFiles::write(&mut self.files.output, &chunk).await;
                        let admitted = {
                            let filter = self.filter.borrow();
                            gate.admit(&chunk, filter.as_ref())
                        };
                        if let Some(text) = admitted {
                            if batch.push(&text) {
                                deadline = Some(Instant::now() + self.flush_interval);
                            }
                        }
                    }
                    Some(PipelineInput::Debug(text)) => {
                        let mut line = text;
                        if !line.ends_with('\n') {
                            line.push('\n');
                        }
                        SessionLogFiles::write(&mut self.files.debug, &line).await;
                        self.sink.emit(BridgeEvent::DebugLog { text: line });
                    }
                    None => break,
                },
                _ = timer => {
                    deadline = None;
                    if let Some(text) = batch.take() {
                        self.sink.emit(BridgeEvent::LogChunk { text });
                    }
                }
            }
        }

        if let Some(text) = batch.take() {
            self.sink.emit(BridgeEvent::LogChunk { text });
        }
        self.files.close().await;
    }
}
