//! Memory sample extraction.

use once_cell::sync::Lazy;
use regex::Regex;
use telebridge_common::{MemoryFigures, MemorySample, current_timestamp_millis};

use super::lines::LineSplitter;

static FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(PSS|RSS|USS|SWAP)\b\s*[:=]?\s*(\d+)").expect("valid regex")
});

/// Extract memory figures from a line carrying both `PSS` and `RSS`.
///
/// `USS` and `SWAP` are optional and default to zero.
pub fn parse_memory_line(line: &str) -> Option<MemoryFigures> {
    let upper = line.to_ascii_uppercase();
    if !upper.contains("PSS") || !upper.contains("RSS") {
        return None;
    }

    let mut figures = MemoryFigures::default();
    let mut seen_pss = false;
    let mut seen_rss = false;
    for caps in FIELD.captures_iter(line) {
        let Ok(value) = caps[2].parse::<u64>() else {
            continue;
        };
        match caps[1].to_ascii_uppercase().as_str() {
            "PSS" => {
                figures.pss = value;
                seen_pss = true;
            }
            "RSS" => {
                figures.rss = value;
                seen_rss = true;
            }
            "USS" => figures.uss = value,
            "SWAP" => figures.swap = value,
            _ => {}
        }
    }

    (seen_pss && seen_rss).then_some(figures)
}

/// Streaming memory parser for one application.
#[derive(Debug)]
pub struct MemoryParser {
    app_name: String,
    lines: LineSplitter,
}

impl MemoryParser {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            lines: LineSplitter::new(),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<MemorySample> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| parse_memory_line(line))
            .map(|figures| MemorySample {
                timestamp: current_timestamp_millis(),
                app_name: self.app_name.clone(),
                figures,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let figures = parse_memory_line("MEM PSS: 10240 RSS: 20480 USS: 8000 SWAP: 12").unwrap();
        assert_eq!(
            figures,
            MemoryFigures {
                pss: 10240,
                rss: 20480,
                uss: 8000,
                swap: 12
            }
        );
    }

    #[test]
    fn test_optional_fields_default_to_zero() {
        let figures = parse_memory_line("pss=512 rss=1024").unwrap();
        assert_eq!(figures.pss, 512);
        assert_eq!(figures.rss, 1024);
        assert_eq!(figures.uss, 0);
    }

    #[test]
    fn test_lines_without_markers_are_ignored() {
        assert!(parse_memory_line("RSS: 100 only").is_none());
        assert!(parse_memory_line("Total PSS by process:").is_none());
        assert!(parse_memory_line("").is_none());
    }

    #[test]
    fn test_streaming_parser() {
        let mut parser = MemoryParser::new("org.example.app");
        assert!(parser.feed("MEM PSS: 1 RSS").is_empty());
        let samples = parser.feed(": 2 USS: 3 SWAP: 0\nnoise\n");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].app_name, "org.example.app");
        assert_eq!(samples[0].figures.rss, 2);
    }
}
