//! Keyword filter for streamed log lines.

use aho_corasick::{AhoCorasick, MatchKind};

use crate::parser::LineSplitter;

/// Multi-keyword line matcher.
///
/// A line passes when it contains any keyword. Keywords are trimmed and
/// blank ones dropped; a filter without keywords passes everything.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    matcher: Option<AhoCorasick>,
    keywords: Vec<String>,
    case_sensitive: bool,
}

impl KeywordFilter {
    pub fn new(keywords: &[String], case_sensitive: bool) -> Result<Self, aho_corasick::BuildError> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let matcher = if keywords.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostFirst)
                    .ascii_case_insensitive(!case_sensitive)
                    .build(&keywords)?,
            )
        };

        Ok(Self {
            matcher,
            keywords,
            case_sensitive,
        })
    }

    pub fn is_active(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn matches(&self, line: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(line),
            None => true,
        }
    }
}

/// Applies an optional [`KeywordFilter`] to a chunked stream.
///
/// Without an active filter chunks pass untouched. With one, only complete
/// lines are judged; the trailing partial line waits for the next chunk.
#[derive(Debug, Default)]
pub struct LineGate {
    lines: LineSplitter,
}

impl LineGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the text of `chunk` that passes `filter`, if any.
    pub fn admit(&mut self, chunk: &str, filter: Option<&KeywordFilter>) -> Option<String> {
        let filter = match filter {
            Some(f) if f.is_active() => f,
            _ => {
                // Filter was switched off: release anything held back.
                let mut text = self.lines.take_partial();
                text.push_str(chunk);
                return (!text.is_empty()).then_some(text);
            }
        };

        let mut passed = String::new();
        for line in self.lines.push(chunk) {
            if filter.matches(&line) {
                passed.push_str(&line);
                passed.push('\n');
            }
        }
        (!passed.is_empty()).then_some(passed)
    }
}
