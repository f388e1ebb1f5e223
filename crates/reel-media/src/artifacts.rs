//! Job-scoped temporary files with guaranteed release.
//!
//! Every segment and the concat manifest are registered here before they are
//! written. Cleanup removes each file independently, then the directory if it
//! is empty, so a failure on one artifact never keeps the others on disk.
//! The guard also cleans up on drop, which covers a job future cancelled by a
//! timeout.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of one cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: Vec<PathBuf>,
    pub dir_removed: bool,
}

/// Owns a job temp directory and the files created in it.
#[derive(Debug)]
pub struct TempArtifacts {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cleaned: bool,
}

impl TempArtifacts {
    /// Create (or reuse) the job temp directory.
    pub async fn create(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Created job temp dir");
        Ok(Self {
            dir,
            files: Vec::new(),
            cleaned: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for `name` inside the temp dir, registered for cleanup.
    pub fn register(&mut self, name: &str) -> PathBuf {
        let path = self.dir.join(name);
        if !self.files.contains(&path) {
            self.files.push(path.clone());
        }
        path
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Remove every registered file, then the directory if empty.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for path in self.files.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), "Failed to remove temp file: {}", e);
                    report.failed.push(path);
                }
            }
        }

        // remove_dir refuses non-empty directories
        match tokio::fs::remove_dir(&self.dir).await {
            Ok(()) => report.dir_removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => report.dir_removed = true,
            Err(e) => debug!(dir = %self.dir.display(), "Temp dir kept: {}", e),
        }

        self.cleaned = true;
        debug!(
            removed = report.removed,
            failed = report.failed.len(),
            dir_removed = report.dir_removed,
            "Temp artifacts cleaned"
        );
        report
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        for path in &self.files {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "Failed to remove temp file on drop: {}", e);
                }
            }
        }
        let _ = std::fs::remove_dir(&self.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cleanup_removes_files_and_dir() {
        let root = TempDir::new().unwrap();
        let mut artifacts = TempArtifacts::create(root.path().join("job")).await.unwrap();

        let a = artifacts.register("segment_0.mp4");
        let b = artifacts.register("concat_list.txt");
        tokio::fs::write(&a, b"x").await.unwrap();
        tokio::fs::write(&b, b"y").await.unwrap();
        // never written, still fine
        artifacts.register("segment_1.mp4");

        let report = artifacts.cleanup().await;
        assert_eq!(report.removed, 2);
        assert!(report.failed.is_empty());
        assert!(report.dir_removed);
        assert!(!root.path().join("job").exists());
    }

    #[tokio::test]
    async fn test_foreign_file_keeps_dir() {
        let root = TempDir::new().unwrap();
        let mut artifacts = TempArtifacts::create(root.path().join("job")).await.unwrap();
        let seg = artifacts.register("segment_0.mp4");
        tokio::fs::write(&seg, b"x").await.unwrap();
        tokio::fs::write(root.path().join("job/other.txt"), b"z").await.unwrap();

        let report = artifacts.cleanup().await;
        assert_eq!(report.removed, 1);
        assert!(!report.dir_removed);
        assert!(!seg.exists());
    }

    #[tokio::test]
    async fn test_drop_cleans_up() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("job");
        {
            let mut artifacts = TempArtifacts::create(&dir).await.unwrap();
            let seg = artifacts.register("segment_0.mp4");
            std::fs::write(&seg, b"x").unwrap();
        }
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let root = TempDir::new().unwrap();
        let mut artifacts = TempArtifacts::create(root.path().join("job")).await.unwrap();
        artifacts.register("segment_0.mp4");
        artifacts.register("segment_0.mp4");
        assert_eq!(artifacts.files().len(), 1);
    }
}
