//! Filesystem helpers shared across modules.
//!
//! These helpers attach operation + path context to IO errors and treat a
//! missing target as success where removal is best-effort.

use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use crate::{Error, Result};

/// Convert an IO error into a library error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error("creating directory", path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all(parent).await
}

/// Remove a file; a missing file is not an error.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error("removing file", path, e)),
    }
}

/// Best-effort removal used on cleanup paths: failures are logged, not returned.
pub async fn discard(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove file during cleanup");
    }
}

/// Ensure a directory exists (synchronous variant).
pub fn ensure_dir_all_sync(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error("creating directory", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.bin");
        assert!(!remove_file_if_exists(&path).await.unwrap());

        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(remove_file_if_exists(&path).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn ensure_parent_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        ensure_parent_dir(&path).await.unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }
}
