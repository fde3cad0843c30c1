//! Structured samples derived from device terminal output.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One row of a CPU or thread table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    /// Process id (CPU table) or thread id (thread table).
    pub id: String,
    /// Owning user (CPU table) or owning process id (thread table).
    pub owner: String,
    /// CPU usage in percent.
    pub value: f64,
    /// Process or thread name.
    pub name: String,
}

/// A parsed CPU or thread table snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSample {
    /// Unix epoch milliseconds when the sample was parsed.
    pub timestamp: i64,
    /// Aggregate CPU usage in percent.
    pub total: f64,
    /// Rows sorted by descending value, truncated to the configured top-N.
    pub rows: Vec<MetricRow>,
}

impl TableSample {
    /// Build a sample from unordered rows, keeping the `top_n` busiest.
    pub fn from_rows(total: f64, mut rows: Vec<MetricRow>, top_n: usize) -> Self {
        rows.sort_by(|a, b| b.value.total_cmp(&a.value));
        rows.truncate(top_n);
        Self {
            timestamp: current_timestamp_millis(),
            total,
            rows,
        }
    }
}

/// Memory footprint of one application, in kilobytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryFigures {
    pub pss: u64,
    pub rss: u64,
    pub uss: u64,
    pub swap: u64,
}

/// A memory sample for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub timestamp: i64,
    pub app_name: String,
    #[serde(flatten)]
    pub figures: MemoryFigures,
}

/// A device reported by the bridge tool's device listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial or `host:port` identifier used with `-s`.
    pub id: String,
    /// Connection state ("device", "offline", "unauthorized", ...).
    pub state: String,
    /// Model / name column, when the tool prints one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// One entry of a local or remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Permission string as printed by `ls -l`; empty for local entries.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permissions: String,
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, value: f64) -> MetricRow {
        MetricRow {
            id: id.to_string(),
            owner: "root".to_string(),
            value,
            name: format!("proc{id}"),
        }
    }

    #[test]
    fn test_from_rows_sorts_and_truncates() {
        let sample = TableSample::from_rows(
            40.0,
            vec![row("1", 2.0), row("2", 30.0), row("3", 8.0), row("4", 0.0)],
            3,
        );

        let ids: Vec<_> = sample.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
        assert_eq!(sample.total, 40.0);
        assert!(sample.timestamp > 0);
    }

    #[test]
    fn test_memory_sample_flattens_figures() {
        let sample = MemorySample {
            timestamp: 1,
            app_name: "org.example.app".to_string(),
            figures: MemoryFigures {
                pss: 10,
                rss: 20,
                uss: 5,
                swap: 0,
            },
        };

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["pss"], 10);
        assert_eq!(json["app_name"], "org.example.app");
    }
}
