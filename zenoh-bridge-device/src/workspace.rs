//! Sandboxed workspace file access.
//!
//! Every path a client names is resolved against one root. Resolution
//! rejects absolute paths and `..` escapes before any I/O, then checks the
//! canonical path of the deepest existing ancestor so a symlink inside the
//! root cannot point outside it.

use std::io;
use std::path::{Component, Path, PathBuf};

use telebridge_common::{DirEntry, EntryKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Path escapes the workspace: {0}")]
    SandboxViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            WorkspaceError::NotFound(path.display().to_string())
        } else {
            WorkspaceError::Io {
                path: path.display().to_string(),
                source,
            }
        }
    }
}

/// Normalise a client path without touching the filesystem.
///
/// Returns `None` for absolute paths and for `..` that climbs above the
/// start.
fn normalize_relative(relative: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}

/// Path-confined file access under one root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceGateway {
    root: PathBuf,
}

impl WorkspaceGateway {
    /// Create the root if needed and canonicalise it.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| WorkspaceError::io(root, e))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| WorkspaceError::io(root, e))?;
        tracing::info!(root = %root.display(), "Workspace ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path inside the root.
    pub async fn resolve(&self, relative: &str) -> Result<PathBuf, WorkspaceError> {
        let violation = || WorkspaceError::SandboxViolation(relative.to_string());

        let normalized = normalize_relative(relative).ok_or_else(violation)?;
        let candidate = self.root.join(&normalized);

        for ancestor in candidate.ancestors() {
            match tokio::fs::canonicalize(ancestor).await {
                Ok(real) => {
                    if real.starts_with(&self.root) {
                        return Ok(candidate);
                    }
                    tracing::warn!(path = %relative, real = %real.display(), "Workspace path escapes root");
                    return Err(violation());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(WorkspaceError::io(ancestor, e)),
            }
        }
        Err(violation())
    }

    /// Path relative to the root, as reported to clients.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Write a file, creating missing parent directories.
    pub async fn save(&self, relative: &str, content: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.resolve(relative).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::io(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| WorkspaceError::io(&path, e))?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Saved workspace file");
        Ok(path)
    }

    pub async fn load(&self, relative: &str) -> Result<String, WorkspaceError> {
        let path = self.resolve(relative).await?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| WorkspaceError::io(&path, e))
    }

    /// List a directory, sorted by name.
    pub async fn list(&self, relative: &str) -> Result<Vec<DirEntry>, WorkspaceError> {
        let dir = self.resolve(relative).await?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| WorkspaceError::io(&dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::io(&dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| WorkspaceError::io(&entry.path(), e))?;
            let kind = if file_type.is_symlink() {
                EntryKind::Symlink
            } else if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };
            let size = match kind {
                EntryKind::File => entry.metadata().await.ok().map(|m| m.len()),
                _ => None,
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size,
                permissions: String::new(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative() {
        assert_eq!(normalize_relative("a/./b/../c"), Some(PathBuf::from("a/c")));
        assert_eq!(normalize_relative(""), Some(PathBuf::new()));
        assert_eq!(normalize_relative("../x"), None);
        assert_eq!(normalize_relative("a/../../x"), None);
        assert_eq!(normalize_relative("/etc/passwd"), None);
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceGateway::open(dir.path().join("ws")).await.unwrap();

        let err = ws.save("../../etc/passwd", "x").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::SandboxViolation(_)));
        assert!(!dir.path().join("etc").exists());
    }

    #[tokio::test]
    async fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceGateway::open(dir.path()).await.unwrap();

        let path = ws.save("reports/a.json", "{}").await.unwrap();
        assert!(path.starts_with(ws.root()));
        assert_eq!(ws.display_path(&path), "reports/a.json");
        assert_eq!(ws.load("reports/a.json").await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceGateway::open(dir.path()).await.unwrap();
        assert!(matches!(
            ws.load("nope.txt").await,
            Err(WorkspaceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorted_with_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceGateway::open(dir.path()).await.unwrap();
        ws.save("b.txt", "12345").await.unwrap();
        ws.save("a/inner.txt", "").await.unwrap();

        let entries = ws.list("").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b.txt"]);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].size, Some(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceGateway::open(dir.path()).await.unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let err = ws.save("link/evil.txt", "x").await.unwrap_err();
        assert!(matches!(err, WorkspaceError::SandboxViolation(_)));
        assert!(!outside.path().join("evil.txt").exists());
    }
}
