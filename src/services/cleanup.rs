//! src/services/cleanup.rs
//!
//! Scoped temp-file ownership. A `TempFile` removes its path when dropped,
//! so every exit path of a handler releases the file without per-branch
//! cleanup calls. Removal failures are logged, never escalated, so they
//! cannot mask a primary error.

use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove temp file {}: {}", self.path.display(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn removes_file_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scratch.bin");
        std::fs::write(&path, b"data").unwrap();

        let guard = TempFile::new(&path);
        assert!(guard.path().exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_on_drop_is_fine() {
        let dir = TempDir::new().unwrap();
        let guard = TempFile::new(dir.path().join("never-created"));
        drop(guard);
    }
}
