//! Continuous CPU, thread and memory monitors.
//!
//! A monitor runs a long-lived remote sampling command and feeds its output
//! through the streaming parsers. At most one monitor of each kind runs per
//! client; starting one replaces the previous. Monitors fail independently:
//! a dead monitor only emits a `monitor_status` event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use telebridge_common::{
    BridgeEvent, MemoryFigures, MemorySample, MetricRow, MonitorKind, TableSample,
    current_timestamp_millis,
};
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use crate::context::BridgeServices;
use crate::events::EventSink;
use crate::parser::{MemoryParser, TableKind, TableParser, Utf8Decoder};
use crate::process::read_chunk;

const MOCK_TICK: Duration = Duration::from_secs(1);
const STDERR_TAIL_BYTES: usize = 512;
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// What to sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorRequest {
    Cpu,
    Thread { pid: String },
    Memory { app_name: String, interval_seconds: u64 },
}

impl MonitorRequest {
    pub fn kind(&self) -> MonitorKind {
        match self {
            MonitorRequest::Cpu => MonitorKind::Cpu,
            MonitorRequest::Thread { .. } => MonitorKind::Thread,
            MonitorRequest::Memory { .. } => MonitorKind::Memory,
        }
    }

    /// Remote command, with placeholders filled in.
    pub fn command(&self, services: &BridgeServices) -> String {
        let config = &services.config;
        match self {
            MonitorRequest::Cpu => config.cpu_monitor_command.clone(),
            MonitorRequest::Thread { pid } => config.thread_monitor_command.replace("{pid}", pid),
            MonitorRequest::Memory {
                app_name,
                interval_seconds,
            } => config
                .memory_monitor_command
                .replace("{app}", app_name)
                .replace("{interval}", &(*interval_seconds).max(1).to_string()),
        }
    }
}

/// Parser state of one running monitor.
#[derive(Debug)]
enum Feed {
    Cpu(TableParser),
    Thread { pid: String, parser: TableParser },
    Memory(MemoryParser),
}

impl Feed {
    fn new(request: &MonitorRequest, top_n: usize) -> Self {
        match request {
            MonitorRequest::Cpu => Feed::Cpu(TableParser::new(TableKind::Process, top_n)),
            MonitorRequest::Thread { pid } => Feed::Thread {
                pid: pid.clone(),
                parser: TableParser::new(TableKind::Thread, top_n),
            },
            MonitorRequest::Memory { app_name, .. } => Feed::Memory(MemoryParser::new(app_name)),
        }
    }

    fn feed(&mut self, chunk: &str) -> Vec<BridgeEvent> {
        match self {
            Feed::Cpu(parser) => parser
                .feed(chunk)
                .into_iter()
                .map(BridgeEvent::CpuSample)
                .collect(),
            Feed::Thread { pid, parser } => parser
                .feed(chunk)
                .into_iter()
                .map(|sample| BridgeEvent::ThreadSample {
                    pid: pid.clone(),
                    sample,
                })
                .collect(),
            Feed::Memory(parser) => parser
                .feed(chunk)
                .into_iter()
                .map(BridgeEvent::MemorySample)
                .collect(),
        }
    }
}

fn monitor_status(kind: MonitorKind, status: &str, message: impl Into<String>) -> BridgeEvent {
    BridgeEvent::MonitorStatus {
        monitor: kind,
        status: status.to_string(),
        message: message.into(),
    }
}

/// The running monitors of one client.
#[derive(Debug, Default)]
pub struct MonitorSet {
    tasks: HashMap<MonitorKind, JoinHandle<()>>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a monitor, replacing any running one of the same kind.
    pub fn start(
        &mut self,
        services: Arc<BridgeServices>,
        sink: EventSink,
        device_id: String,
        request: MonitorRequest,
    ) {
        let kind = request.kind();
        self.stop(kind);

        tracing::info!(monitor = %kind, device = %device_id, "Starting monitor");
        let task = if services.config.is_mock(&device_id) {
            tokio::spawn(run_mock(sink, request))
        } else {
            tokio::spawn(run_remote(services, sink, device_id, request))
        };
        self.tasks.insert(kind, task);
    }

    /// Stop a monitor. Returns false if none was running.
    pub fn stop(&mut self, kind: MonitorKind) -> bool {
        match self.tasks.remove(&kind) {
            Some(task) => {
                task.abort();
                tracing::debug!(monitor = %kind, "Monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (kind, task) in self.tasks.drain() {
            task.abort();
            tracing::debug!(monitor = %kind, "Monitor stopped");
        }
    }

    pub fn is_running(&self, kind: MonitorKind) -> bool {
        self.tasks.get(&kind).is_some_and(|t| !t.is_finished())
    }
}

impl Drop for MonitorSet {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn run_remote(
    services: Arc<BridgeServices>,
    sink: EventSink,
    device_id: String,
    request: MonitorRequest,
) {
    let kind = request.kind();

    let probe = services
        .recovery
        .run(&sink, |_| services.tool.probe(&device_id))
        .await;
    if let Err(e) = probe {
        tracing::warn!(monitor = %kind, device = %device_id, error = %e, "Monitor probe failed");
        sink.emit(monitor_status(kind, "error", e.to_string()));
        return;
    }

    let command = request.command(&services);
    let spec = services.tool.shell_spec(&device_id, Some(&command));
    let mut child = match services.tool.spawner().spawn(&spec) {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(monitor = %kind, error = %e, "Failed to spawn monitor");
            sink.emit(monitor_status(kind, "error", format!("Failed to start `{spec}`: {e}")));
            return;
        }
    };
    let Some(mut stdout) = child.stdout.take() else {
        sink.emit(monitor_status(kind, "error", "monitor stdout not piped"));
        return;
    };
    let mut stderr = child.stderr.take();

    let mut feed = Feed::new(&request, services.config.top_n);
    let mut decoder = Utf8Decoder::new();
    let mut buf = vec![0u8; 8192];
    let mut err_buf = [0u8; 1024];
    let mut tail = StderrTail::default();

    loop {
        tokio::select! {
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    for event in feed.feed(&decoder.decode(&buf[..n])) {
                        sink.emit(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(monitor = %kind, error = %e, "Monitor read failed");
                    sink.emit(monitor_status(kind, "error", e.to_string()));
                    return;
                }
            },
            read = read_chunk(&mut stderr, &mut err_buf) => match read {
                Ok(0) | Err(_) => stderr = None,
                Ok(n) => tail.push(&err_buf[..n]),
            },
        }
    }

    // stdout is closed; pick up whatever stderr still holds.
    if let Some(mut rest) = stderr {
        let drain = async {
            while let Ok(n) = rest.read(&mut err_buf).await {
                if n == 0 {
                    break;
                }
                tail.push(&err_buf[..n]);
            }
        };
        let _ = tokio::time::timeout(STDERR_DRAIN, drain).await;
    }

    let (status, mut message) = match child.wait().await {
        Ok(code) if code.success() => ("stopped", format!("Monitor command exited: {code}")),
        Ok(code) => ("error", format!("Monitor command exited: {code}")),
        Err(e) => ("error", format!("Monitor command lost: {e}")),
    };
    if let Some(text) = tail.text() {
        message.push_str(": ");
        message.push_str(&text);
    }
    tracing::info!(monitor = %kind, device = %device_id, "{}", message);
    sink.emit(monitor_status(kind, status, message));
}

/// Last bytes a monitor command wrote to stderr.
#[derive(Debug, Default)]
struct StderrTail {
    bytes: Vec<u8>,
}

impl StderrTail {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > STDERR_TAIL_BYTES {
            let excess = self.bytes.len() - STDERR_TAIL_BYTES;
            self.bytes.drain(..excess);
        }
    }

    fn text(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.bytes);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Triangle wave in `[0, amplitude]` with the given period in ticks.
fn oscillate(tick: u64, period: u64, amplitude: f64) -> f64 {
    let half = (period / 2).max(1);
    let phase = tick % period.max(2);
    let rising = if phase <= half { phase } else { period - phase };
    amplitude * rising as f64 / half as f64
}

const MOCK_PROCESSES: [(&str, &str); 5] = [
    ("412", "enlightenment"),
    ("538", "launchpad-process-pool"),
    ("601", "dlog_logger"),
    ("733", "connmand"),
    ("815", "org.example.app"),
];

fn mock_rows(tick: u64, owner: Option<&str>, top_n: usize) -> TableSample {
    let rows: Vec<MetricRow> = MOCK_PROCESSES
        .iter()
        .enumerate()
        .map(|(i, (id, name))| MetricRow {
            id: id.to_string(),
            owner: owner.unwrap_or("root").to_string(),
            value: oscillate(tick + i as u64 * 3, 20, 30.0 / (i as f64 + 1.0)).round(),
            name: name.to_string(),
        })
        .collect();
    let total = rows.iter().map(|r| r.value).sum();
    TableSample::from_rows(total, rows, top_n)
}

/// Deterministic sample of the mock device at `tick`.
pub fn mock_sample(request: &MonitorRequest, tick: u64, top_n: usize) -> BridgeEvent {
    match request {
        MonitorRequest::Cpu => BridgeEvent::CpuSample(mock_rows(tick, None, top_n)),
        MonitorRequest::Thread { pid } => BridgeEvent::ThreadSample {
            pid: pid.clone(),
            sample: mock_rows(tick, Some(pid), top_n),
        },
        MonitorRequest::Memory { app_name, .. } => {
            let swing = oscillate(tick, 30, 8_000.0) as u64;
            BridgeEvent::MemorySample(MemorySample {
                timestamp: current_timestamp_millis(),
                app_name: app_name.clone(),
                figures: MemoryFigures {
                    pss: 42_000 + swing,
                    rss: 61_000 + swing,
                    uss: 35_000 + swing / 2,
                    swap: 1_024,
                },
            })
        }
    }
}

async fn run_mock(sink: EventSink, request: MonitorRequest) {
    let period = match &request {
        MonitorRequest::Memory {
            interval_seconds, ..
        } => Duration::from_secs((*interval_seconds).max(1)),
        _ => MOCK_TICK,
    };
    let mut ticker = tokio::time::interval(period);
    let mut tick = 0u64;
    loop {
        ticker.tick().await;
        if sink.is_closed() {
            break;
        }
        sink.emit(mock_sample(&request, tick, 10));
        tick += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oscillate_triangle() {
        let values: Vec<f64> = (0..5).map(|t| oscillate(t, 4, 10.0)).collect();
        assert_eq!(values, vec![0.0, 5.0, 10.0, 5.0, 0.0]);
    }

    #[test]
    fn test_mock_samples_are_deterministic() {
        let a = mock_sample(&MonitorRequest::Cpu, 7, 3);
        let b = mock_sample(&MonitorRequest::Cpu, 7, 3);
        let (BridgeEvent::CpuSample(a), BridgeEvent::CpuSample(b)) = (a, b) else {
            panic!("expected cpu samples");
        };
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.rows.len(), 3);
        assert!(a.rows.windows(2).all(|w| w[0].value >= w[1].value));
    }

    #[test]
    fn test_mock_thread_sample_carries_pid() {
        let event = mock_sample(
            &MonitorRequest::Thread {
                pid: "815".to_string(),
            },
            0,
            10,
        );
        match event {
            BridgeEvent::ThreadSample { pid, sample } => {
                assert_eq!(pid, "815");
                assert!(sample.rows.iter().all(|r| r.owner == "815"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_feed_maps_thread_samples() {
        let mut feed = Feed::new(
            &MonitorRequest::Thread {
                pid: "812".to_string(),
            },
            10,
        );
        let events = feed.feed(
            "User 4%, System 2%, IOW 0%, IRQ 0%\n  \
             PID   TID PR CPU% S     VSS     RSS PCY UID      Thread          Proc\n  \
             812   815  1   3% S 123456K  23456K  fg app_fw   RenderThread    org.app\n",
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BridgeEvent::ThreadSample { pid, .. } if pid == "812"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_monitor_ticks() {
        let (sink, mut events) = EventSink::channel();
        let task = tokio::spawn(run_mock(sink, MonitorRequest::Cpu));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        task.abort();

        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, BridgeEvent::CpuSample(_)));
            count += 1;
        }
        assert_eq!(count, 3);
    }

    async fn scripted_services(dir: &std::path::Path, script: &str) -> Arc<BridgeServices> {
        use crate::device::DeviceTool;
        use crate::process::{ProcessSpawner, ScriptedSpawner};
        use crate::workspace::WorkspaceGateway;

        let config = crate::config::DeviceConfig {
            workspace_root: Some(dir.to_path_buf()),
            ..Default::default()
        };
        let spawner: Arc<dyn ProcessSpawner> = Arc::new(ScriptedSpawner::new(script));
        let tool = DeviceTool::new(
            Arc::clone(&spawner),
            "sdb",
            config.command_timeout(),
            config.probe_timeout(),
        );
        let workspace = Arc::new(WorkspaceGateway::open(dir).await.unwrap());
        Arc::new(BridgeServices::assemble(config, spawner, tool, workspace))
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        // Enough stderr to fill a pipe before the command gives up.
        let services = scripted_services(
            dir.path(),
            r#"case "$*" in
                *telebridge-probe*) echo telebridge-probe ;;
                *)
                    i=0
                    while [ $i -lt 4000 ]; do
                        echo "top: cannot open /proc/stat" >&2
                        i=$((i + 1))
                    done
                    echo "top: not found" >&2
                    exit 127
                    ;;
            esac"#,
        )
        .await;
        let (sink, mut events) = EventSink::channel();

        tokio::time::timeout(
            Duration::from_secs(20),
            run_remote(services, sink, "emulator-26101".to_string(), MonitorRequest::Cpu),
        )
        .await
        .expect("monitor finishes");

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        match last {
            Some(BridgeEvent::MonitorStatus {
                monitor,
                status,
                message,
            }) => {
                assert_eq!(monitor, MonitorKind::Cpu);
                assert_eq!(status, "error");
                assert!(message.contains("127"), "{message}");
                assert!(message.ends_with("top: not found"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stderr_tail_keeps_last_bytes() {
        let mut tail = StderrTail::default();
        assert_eq!(tail.text(), None);

        tail.push(&vec![b'x'; STDERR_TAIL_BYTES]);
        tail.push(b"\nlast line\n");
        let text = tail.text().unwrap();
        assert!(text.ends_with("last line"));
        assert_eq!(tail.bytes.len(), STDERR_TAIL_BYTES);
    }
}
