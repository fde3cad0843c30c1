//! Session command templates.
//!
//! A template such as `dlogutil -v kerneltime $(TAGS)` gets the tag list
//! substituted for its placeholder, then the result is cleaned so an empty
//! or partial tag list does not leave a malformed command behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholders replaced by the space-joined tags, longest first.
const PLACEHOLDERS: [&str; 3] = ["$(TAGS)", "${TAGS}", "{TAGS}"];

/// Stands in for an emptied placeholder until its clause is removed.
const HOLE: char = '\u{1f}';

// A filter flag, or a bare grep, whose argument was an emptied placeholder.
static EMPTY_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(?:--tag|-[st]|grep(?:\s+-[A-Za-z]+)*)\s*\x{1f}").expect("valid regex")
});

static HOLES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\x{1f}\s*").expect("valid regex"));

static REPEATED_PIPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|(?:\s+\|)+").expect("valid regex"));

static REPEATED_SEMICOLON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r";(?:\s*;)+").expect("valid regex"));

static REPEATED_AND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&&(?:\s*&&)+").expect("valid regex"));

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static LEADING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\s*(?:\|\||\||;|&&)\s*)+").expect("valid regex"));

static TRAILING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\s*(?:\|\||\||;|&&)\s*)+$").expect("valid regex"));

/// Substitute `tags` into `template` and clean up the result.
///
/// Tags are trimmed and blank ones dropped. A template without a
/// placeholder is returned as is; with an empty tag list, the filter
/// flags that took the placeholder are removed along with it.
///
/// # Example
/// ```
/// use zenoh_bridge_device::template::resolve_command;
///
/// let tags = vec!["UI".to_string(), "NET".to_string()];
/// assert_eq!(
///     resolve_command("dlogutil -v kerneltime $(TAGS)", &tags),
///     "dlogutil -v kerneltime UI NET"
/// );
/// assert_eq!(resolve_command("dlogutil -v kerneltime $(TAGS)", &[]), "dlogutil -v kerneltime");
/// assert_eq!(resolve_command("dmesg -t", &[]), "dmesg -t");
/// ```
pub fn resolve_command(template: &str, tags: &[String]) -> String {
    if !PLACEHOLDERS.iter().any(|p| template.contains(p)) {
        return template.to_string();
    }

    let joined = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if !joined.is_empty() {
        let mut command = template.to_string();
        for placeholder in PLACEHOLDERS {
            command = command.replace(placeholder, &joined);
        }
        return command.trim().to_string();
    }

    let mut command = template.to_string();
    for placeholder in PLACEHOLDERS {
        command = command.replace(placeholder, &HOLE.to_string());
    }

    // Removing one clause can expose another ("-s -t <hole>").
    loop {
        let next = EMPTY_FILTER
            .replace_all(&command, format!(" {HOLE}").as_str())
            .into_owned();
        if next == command {
            break;
        }
        command = next;
    }

    clean_command(&HOLES.replace_all(&command, " "))
}

/// Collapse doubled separators and whitespace, and strip dangling ones.
pub fn clean_command(command: &str) -> String {
    let current = REPEATED_PIPE.replace_all(command, "|");
    let current = REPEATED_SEMICOLON.replace_all(&current, ";");
    let current = REPEATED_AND.replace_all(&current, "&&");
    let current = WHITESPACE.replace_all(&current, " ");
    let current = LEADING_SEPARATORS.replace(&current, "");
    let current = TRAILING_SEPARATORS.replace(&current, "");
    current.trim().to_string()
}
