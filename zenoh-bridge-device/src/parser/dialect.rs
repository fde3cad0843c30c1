//! `top` output dialects.
//!
//! Different firmware ships different `top` implementations. Each dialect
//! classifies one line at a time; [`detect_dialect`] picks the dialect from
//! the first line that identifies one.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use telebridge_common::MetricRow;

/// Which table a monitor parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// One row per process.
    Process,
    /// One row per thread of a single process.
    Thread,
}

impl TableKind {
    /// Fewest whitespace-separated columns a data row must have.
    pub fn min_columns(self) -> usize {
        match self {
            TableKind::Process => 5,
            TableKind::Thread => 6,
        }
    }

    /// Column assumed to hold the CPU percentage when no token carries `%`.
    pub fn fallback_cpu_index(self) -> usize {
        match self {
            TableKind::Process => 2,
            TableKind::Thread => 3,
        }
    }
}

/// Classification of one line of `top` output.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// Aggregate CPU usage in percent.
    Summary(f64),
    /// Column header; starts a table.
    Header,
    Row(MetricRow),
    Other,
}

/// One `top` output flavour.
pub trait TableDialect: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn classify(&mut self, line: &str) -> LineClass;
}

static NUMBER_AFTER_EQUALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\s*(\d+(?:\.\d+)?)").expect("valid regex"));

static PERCENT_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid regex"));

static TOYBOX_CPU: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)%cpu").expect("valid regex"));

static TOYBOX_IDLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)%idle").expect("valid regex"));

fn parse_percent(token: &str) -> Option<f64> {
    token.trim_end_matches('%').parse().ok()
}

fn is_numeric_id(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Legacy Android/Tizen `top`.
///
/// ```text
/// User 10% + System 5% + IOW 2% = 17% Total
///   PID PR CPU% S  #THR     VSS     RSS PCY UID      Name
///  1234  0  12% S    30 123456K  23456K  fg u0_a12   com.example.app
/// ```
#[derive(Debug, Clone)]
pub struct ClassicTop {
    kind: TableKind,
}

impl ClassicTop {
    pub fn new(kind: TableKind) -> Self {
        Self { kind }
    }

    fn recognizes(line: &str) -> bool {
        let trimmed = line.trim_start();
        Self::is_summary(trimmed) || Self::is_header(trimmed)
    }

    fn is_summary(trimmed: &str) -> bool {
        trimmed.starts_with("User") && trimmed.contains('%')
    }

    fn is_header(trimmed: &str) -> bool {
        trimmed.starts_with("PID") && trimmed.contains("CPU")
    }

    /// First number after `=`, else the sum of every percentage on the line.
    fn summary_total(line: &str) -> Option<f64> {
        if let Some(caps) = NUMBER_AFTER_EQUALS.captures(line) {
            return caps[1].parse().ok();
        }

        let mut found = false;
        let mut sum = 0.0;
        for caps in PERCENT_VALUE.captures_iter(line) {
            if let Ok(value) = caps[1].parse::<f64>() {
                sum += value;
                found = true;
            }
        }
        found.then_some(sum)
    }

    fn row(&self, tokens: &[&str]) -> Option<MetricRow> {
        if tokens.len() < self.kind.min_columns() || !is_numeric_id(tokens[0]) {
            return None;
        }

        let value = tokens
            .iter()
            .skip(2)
            .find(|t| t.contains('%'))
            .and_then(|t| parse_percent(t))
            .or_else(|| parse_percent(tokens[self.kind.fallback_cpu_index()]))?;

        let last = tokens.len() - 1;
        let row = match self.kind {
            TableKind::Process => MetricRow {
                id: tokens[0].to_string(),
                owner: tokens[last - 1].to_string(),
                value,
                name: tokens[last].to_string(),
            },
            TableKind::Thread => {
                if !is_numeric_id(tokens[1]) {
                    return None;
                }
                // Trailing columns are `Thread Proc` when the table is wide.
                let name = if tokens.len() > self.kind.min_columns() {
                    tokens[last - 1]
                } else {
                    tokens[last]
                };
                MetricRow {
                    id: tokens[1].to_string(),
                    owner: tokens[0].to_string(),
                    value,
                    name: name.to_string(),
                }
            }
        };
        Some(row)
    }
}

impl TableDialect for ClassicTop {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn classify(&mut self, line: &str) -> LineClass {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineClass::Other;
        }
        if Self::is_summary(trimmed) {
            return match Self::summary_total(trimmed) {
                Some(total) => LineClass::Summary(total),
                None => LineClass::Other,
            };
        }
        if Self::is_header(trimmed) {
            return LineClass::Header;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match self.row(&tokens) {
            Some(row) => LineClass::Row(row),
            None => LineClass::Other,
        }
    }
}

/// Column positions learned from a toybox header row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMap {
    id: usize,
    owner: Option<usize>,
    cpu: usize,
    name: usize,
    /// The name column is the last one and may contain spaces.
    name_is_last: bool,
}

/// Toybox `top` as shipped on current firmware.
///
/// ```text
/// 800%cpu  12%user   0%nice  10%sys 778%idle   0%iow   0%irq   0%sirq   0%host
///   PID USER         PR  NI VIRT  RES  SHR S[%CPU] %MEM     TIME+ ARGS
///  1234 u0_a12       10 -10 4.5G 180M 120M S 12.3   4.9   1:23.45 com.example.app
/// ```
///
/// The header row is parsed into a column map, so rows are read by column
/// name instead of by position.
#[derive(Debug, Clone)]
pub struct ToyboxTop {
    kind: TableKind,
    columns: Option<ColumnMap>,
}

impl ToyboxTop {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            columns: None,
        }
    }

    fn recognizes(line: &str) -> bool {
        TOYBOX_CPU.is_match(line) || Self::header_tokens(line).is_some()
    }

    /// `S[%CPU]` marks the sort column; the brackets glue two names together.
    fn header_tokens(line: &str) -> Option<Vec<String>> {
        let normalized = line.replace(['[', ']'], " ");
        let tokens: Vec<String> = normalized
            .split_whitespace()
            .map(|t| t.to_ascii_uppercase())
            .collect();
        let has_id = tokens.iter().any(|t| t == "PID" || t == "TID");
        let has_cpu = tokens.iter().any(|t| t == "%CPU");
        (has_id && has_cpu).then_some(tokens)
    }

    fn column_map(&self, tokens: &[String]) -> Option<ColumnMap> {
        let find = |names: &[&str]| tokens.iter().position(|t| names.contains(&t.as_str()));

        let cpu = find(&["%CPU"])?;
        let (id, owner) = match self.kind {
            TableKind::Process => (find(&["PID"])?, find(&["USER", "UID"])),
            TableKind::Thread => match find(&["TID"]) {
                Some(tid) => (tid, find(&["PID"]).or_else(|| find(&["USER", "UID"]))),
                None => (find(&["PID"])?, find(&["USER", "UID"])),
            },
        };
        let name = match self.kind {
            TableKind::Thread => find(&["THREAD", "CMD", "NAME"]),
            TableKind::Process => find(&["ARGS", "NAME", "CMD", "COMMAND", "CMDLINE"]),
        }
        .unwrap_or(tokens.len() - 1);

        Some(ColumnMap {
            id,
            owner,
            cpu,
            name,
            name_is_last: name == tokens.len() - 1,
        })
    }

    fn summary_total(line: &str) -> Option<f64> {
        let cpu: f64 = TOYBOX_CPU.captures(line)?[1].parse().ok()?;
        let idle: f64 = TOYBOX_IDLE
            .captures(line)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0.0);
        if cpu <= 0.0 {
            return None;
        }
        Some(((cpu - idle) * 100.0 / cpu).max(0.0))
    }

    fn row(&self, columns: &ColumnMap, tokens: &[&str]) -> Option<MetricRow> {
        if tokens.len() < self.kind.min_columns() {
            return None;
        }
        let id = *tokens.get(columns.id)?;
        if !is_numeric_id(id) {
            return None;
        }
        let value = parse_percent(tokens.get(columns.cpu)?)?;
        let name = if columns.name_is_last {
            tokens.get(columns.name..)?.join(" ")
        } else {
            tokens.get(columns.name)?.to_string()
        };
        let owner = columns
            .owner
            .and_then(|i| tokens.get(i))
            .map(|t| t.to_string())
            .unwrap_or_default();

        Some(MetricRow {
            id: id.to_string(),
            owner,
            value,
            name,
        })
    }
}

impl TableDialect for ToyboxTop {
    fn name(&self) -> &'static str {
        "toybox"
    }

    fn classify(&mut self, line: &str) -> LineClass {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineClass::Other;
        }
        if let Some(total) = Self::summary_total(trimmed) {
            return LineClass::Summary(total);
        }
        if let Some(tokens) = Self::header_tokens(trimmed) {
            if self.columns.is_none() {
                self.columns = self.column_map(&tokens);
                tracing::debug!(columns = ?self.columns, "Parsed top header");
            }
            return LineClass::Header;
        }

        let Some(columns) = &self.columns else {
            return LineClass::Other;
        };
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        match self.row(columns, &tokens) {
            Some(row) => LineClass::Row(row),
            None => LineClass::Other,
        }
    }
}

/// Pick the dialect a line identifies, if any.
pub fn detect_dialect(line: &str, kind: TableKind) -> Option<Box<dyn TableDialect>> {
    if ToyboxTop::recognizes(line) {
        Some(Box::new(ToyboxTop::new(kind)))
    } else if ClassicTop::recognizes(line) {
        Some(Box::new(ClassicTop::new(kind)))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_summary_marker_and_fallback() {
        let mut dialect = ClassicTop::new(TableKind::Process);
        assert_eq!(
            dialect.classify("User 10% + System 5% ... = 17% Total"),
            LineClass::Summary(17.0)
        );
        assert_eq!(
            dialect.classify("User 10%, System 5%, IOW 0%, IRQ 0%"),
            LineClass::Summary(15.0)
        );
        // Tick counts carry no percentage.
        assert_eq!(
            dialect.classify("User 25 + Nice 0 + Sys 12 + Idle 140 = 177"),
            LineClass::Other
        );
    }

    #[test]
    fn test_classic_process_row() {
        let mut dialect = ClassicTop::new(TableKind::Process);
        assert_eq!(
            dialect.classify("  PID PR CPU% S  #THR     VSS     RSS PCY UID      Name"),
            LineClass::Header
        );

        let LineClass::Row(row) = dialect
            .classify(" 1234  0  12% S    30 123456K  23456K  fg u0_a12   com.example.app")
        else {
            panic!("expected row");
        };
        assert_eq!(row.id, "1234");
        assert_eq!(row.owner, "u0_a12");
        assert_eq!(row.value, 12.0);
        assert_eq!(row.name, "com.example.app");
    }

    #[test]
    fn test_classic_positional_fallback() {
        let mut dialect = ClassicTop::new(TableKind::Process);
        let LineClass::Row(row) = dialect.classify("77 0 4 S 1 root kworker") else {
            panic!("expected row");
        };
        assert_eq!(row.value, 4.0);
    }

    #[test]
    fn test_classic_rejects_short_and_garbage_rows() {
        let mut dialect = ClassicTop::new(TableKind::Process);
        assert_eq!(dialect.classify("12 0 3%"), LineClass::Other);
        assert_eq!(dialect.classify("abc 0 3% S 1 root x"), LineClass::Other);
        assert_eq!(dialect.classify("12 0 n/a S 1 root x"), LineClass::Other);
    }

    #[test]
    fn test_classic_thread_row() {
        let mut dialect = ClassicTop::new(TableKind::Thread);
        let LineClass::Row(row) = dialect.classify(
            "  812   815  0  7% S 123456K 23456K fg u0_a12 RenderThread com.example.app",
        ) else {
            panic!("expected row");
        };
        assert_eq!(row.id, "815");
        assert_eq!(row.owner, "812");
        assert_eq!(row.value, 7.0);
        assert_eq!(row.name, "RenderThread");
    }

    #[test]
    fn test_toybox_summary_is_normalised() {
        let mut dialect = ToyboxTop::new(TableKind::Process);
        let line = "800%cpu  12%user   0%nice  10%sys 778%idle   0%iow   0%irq   0%sirq   0%host";
        assert_eq!(dialect.classify(line), LineClass::Summary(2.75));
    }

    #[test]
    fn test_toybox_rows_use_header_map() {
        let mut dialect = ToyboxTop::new(TableKind::Process);

        // Rows before the header cannot be placed.
        assert_eq!(
            dialect.classify(" 1234 u0_a12 10 -10 4.5G 180M 120M S 12.3 4.9 1:23.45 app"),
            LineClass::Other
        );

        assert_eq!(
            dialect.classify("  PID USER         PR  NI VIRT  RES  SHR S[%CPU] %MEM     TIME+ ARGS"),
            LineClass::Header
        );

        let LineClass::Row(row) = dialect.classify(
            " 1234 u0_a12       10 -10 4.5G 180M 120M S 12.3   4.9   1:23.45 /system/bin/app --flag",
        ) else {
            panic!("expected row");
        };
        assert_eq!(row.id, "1234");
        assert_eq!(row.owner, "u0_a12");
        assert_eq!(row.value, 12.3);
        assert_eq!(row.name, "/system/bin/app --flag");
    }

    #[test]
    fn test_toybox_thread_header() {
        let mut dialect = ToyboxTop::new(TableKind::Thread);
        dialect.classify("  PID   TID USER  PR  NI S[%CPU] %MEM TIME+ THREAD PROCESS");

        let LineClass::Row(row) =
            dialect.classify("  812   815 u0_a12 10 -10 S 7.5 1.0 0:01.00 RenderThread app")
        else {
            panic!("expected row");
        };
        assert_eq!(row.id, "815");
        assert_eq!(row.owner, "812");
        assert_eq!(row.name, "RenderThread");
    }

    #[test]
    fn test_detect_dialect() {
        let kind = TableKind::Process;
        assert_eq!(
            detect_dialect("User 10% + System 5% = 15% Total", kind).map(|d| d.name()),
            Some("classic")
        );
        assert_eq!(
            detect_dialect("  PID PR CPU% S #THR VSS RSS PCY UID Name", kind).map(|d| d.name()),
            Some("classic")
        );
        assert_eq!(
            detect_dialect("400%cpu 3%user 0%nice 1%sys 396%idle", kind).map(|d| d.name()),
            Some("toybox")
        );
        assert_eq!(
            detect_dialect("  PID USER PR NI VIRT RES SHR S[%CPU] %MEM TIME+ ARGS", kind)
                .map(|d| d.name()),
            Some("toybox")
        );
        assert!(detect_dialect("Tasks: 512 total", kind).is_none());
    }
}
