//! Streaming CPU/thread table parser.

use telebridge_common::{MetricRow, TableSample};

use super::dialect::{LineClass, TableDialect, TableKind, detect_dialect};
use super::lines::LineSplitter;

/// Turns the continuous output of a `top` process into samples.
///
/// The dialect is chosen by the first line that identifies one. A sample
/// is emitted at the end of every chunk that added rows to the current
/// screen, so clients do not wait for a screen to complete; a new summary
/// or header starts a new screen.
#[derive(Debug)]
pub struct TableParser {
    kind: TableKind,
    top_n: usize,
    lines: LineSplitter,
    dialect: Option<Box<dyn TableDialect>>,
    total: Option<f64>,
    rows: Vec<MetricRow>,
    in_table: bool,
    dirty: bool,
}

impl TableParser {
    pub fn new(kind: TableKind, top_n: usize) -> Self {
        Self {
            kind,
            top_n,
            lines: LineSplitter::new(),
            dialect: None,
            total: None,
            rows: Vec::new(),
            in_table: false,
            dirty: false,
        }
    }

    /// Name of the detected dialect.
    pub fn dialect(&self) -> Option<&'static str> {
        self.dialect.as_ref().map(|d| d.name())
    }

    /// Feed a chunk of raw output, returning the samples it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<TableSample> {
        let mut samples = Vec::new();

        for line in self.lines.push(chunk) {
            if self.dialect.is_none() {
                self.dialect = detect_dialect(&line, self.kind);
                if let Some(name) = self.dialect() {
                    tracing::debug!(dialect = name, "Detected top dialect");
                }
            }
            let Some(dialect) = self.dialect.as_mut() else {
                continue;
            };

            match dialect.classify(&line) {
                LineClass::Summary(total) => {
                    samples.extend(self.flush());
                    self.rows.clear();
                    self.total = Some(total);
                    self.in_table = false;
                }
                LineClass::Header => {
                    if !self.rows.is_empty() {
                        samples.extend(self.flush());
                        self.rows.clear();
                    }
                    self.in_table = true;
                }
                LineClass::Row(row) if self.in_table => {
                    self.rows.push(row);
                    self.dirty = true;
                }
                LineClass::Row(_) => {}
                LineClass::Other => {
                    if self.in_table && !line.trim().is_empty() {
                        tracing::trace!(line = %line, "Skipping unparseable top line");
                    }
                }
            }
        }

        samples.extend(self.flush());
        samples
    }

    fn flush(&mut self) -> Option<TableSample> {
        if !self.dirty || self.rows.is_empty() {
            return None;
        }
        self.dirty = false;

        let total = self
            .total
            .unwrap_or_else(|| self.rows.iter().map(|r| r.value).sum());
        Some(TableSample::from_rows(total, self.rows.clone(), self.top_n))
    }
}
