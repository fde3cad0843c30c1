//! `ls -l` output parser.

use once_cell::sync::Lazy;
use regex::Regex;
use telebridge_common::{DirEntry, EntryKind};

// perms, links, owner, group, [major,] size, date, name
static LS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<perms>[-dlcbps][-rwxsStTl]{9})[.+@]?\s+\d+\s+\S+\s+\S+\s+",
        r"(?:(?P<major>\d+),\s*)?(?P<size>\d+)\s+",
        r"(?:\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:\s+[+-]\d{4})?",
        r"|[A-Z][a-z]{2}\s+\d{1,2}\s+(?:\d{2}:\d{2}|\d{4}))",
        r"\s+(?P<name>.+)$"
    ))
    .expect("valid regex")
});

fn kind_of(perms: &str) -> EntryKind {
    match perms.as_bytes().first() {
        Some(b'-') => EntryKind::File,
        Some(b'd') => EntryKind::Directory,
        Some(b'l') => EntryKind::Symlink,
        _ => EntryKind::Other,
    }
}

/// Parse `ls -l` output into entries.
///
/// `total N` lines, `.`/`..` and lines that do not look like a long
/// listing are skipped. Symlink targets are stripped from the name.
pub fn parse_ls_long(output: &str) -> Vec<DirEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            if line.starts_with("total ") {
                return None;
            }
            let caps = LS_LINE.captures(line)?;
            let perms = &caps["perms"];
            let kind = kind_of(perms);

            let mut name = &caps["name"];
            if kind == EntryKind::Symlink {
                if let Some((link, _target)) = name.split_once(" -> ") {
                    name = link;
                }
            }
            if name == "." || name == ".." {
                return None;
            }

            let size = if caps.name("major").is_some() {
                None
            } else {
                caps["size"].parse().ok()
            };

            Some(DirEntry {
                name: name.to_string(),
                kind,
                size,
                permissions: perms.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toybox_listing() {
        let output = "\
total 24
drwxr-xr-x  2 root root 4096 2024-03-01 12:00 .
drwxrwxrwt 10 root root 4096 2024-03-01 11:00 ..
-rw-r--r--  1 owner users 1234 2024-03-01 12:01 dump.log
drwxr-xr-x  3 root root 4096 2024-02-28 09:15 media
lrwxrwxrwx  1 root root   11 2024-02-28 09:15 current -> /opt/usr/ap
crw-rw-rw-  1 root root 1,   3 2024-02-28 09:15 null
";
        let entries = parse_ls_long(output);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["dump.log", "media", "current", "null"]);

        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, Some(1234));
        assert_eq!(entries[0].permissions, "-rw-r--r--");
        assert_eq!(entries[1].kind, EntryKind::Directory);
        assert_eq!(entries[2].kind, EntryKind::Symlink);
        assert_eq!(entries[3].kind, EntryKind::Other);
        assert_eq!(entries[3].size, None);
    }

    #[test]
    fn test_busybox_dates_and_spaces() {
        let output = "-rw-r--r--    1 root     root          52 Jan  5 08:09 my notes.txt\n\
                      -rw-r--r--    1 root     root           7 Dec 31  2023 old.txt\n";
        let entries = parse_ls_long(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "my notes.txt");
        assert_eq!(entries[1].size, Some(7));
    }

    #[test]
    fn test_errors_yield_nothing() {
        assert!(parse_ls_long("ls: /nope: No such file or directory\n").is_empty());
    }
}
