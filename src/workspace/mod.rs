//! Workspace management
//!
//! Every operation gets its own scratch directory under `temp/`, a
//! [`tempfile::TempDir`] removed when the [`Workspace`] guard is dropped.
//! Finished outputs are moved into the shared [`ProcessedStore`] before that
//! happens.

pub mod store;

pub use store::{format_file_size, ArtifactName, FetchedArtifact, ProcessedStore, StoredArtifact};

use crate::error::Result;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const UPLOADS_DIR: &str = "uploads";
const TEMP_DIR: &str = "temp";
const PROCESSED_DIR: &str = "processed";

/// Owns the data root and its three areas
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    uploads: PathBuf,
    temp: PathBuf,
    store: ProcessedStore,
}

impl WorkspaceManager {
    /// Create the data root layout if it does not exist yet.
    ///
    /// The root is canonicalized: every path handed to the tool is absolute,
    /// so paths it echoes back resolve the same way from any directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let root = fs::canonicalize(&root)?;

        let uploads = root.join(UPLOADS_DIR);
        let temp = root.join(TEMP_DIR);
        let processed = root.join(PROCESSED_DIR);

        for dir in [&uploads, &temp, &processed] {
            fs::create_dir_all(dir)?;
        }

        Ok(Self {
            root,
            uploads,
            temp,
            store: ProcessedStore::new(processed),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    pub fn processed_store_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn store(&self) -> &ProcessedStore {
        &self.store
    }

    /// Allocate a fresh, uniquely named scratch directory.
    pub fn new_workspace(&self) -> Result<Workspace> {
        let dir = tempfile::Builder::new()
            .prefix("ws-")
            .tempdir_in(&self.temp)?;
        tracing::debug!(path = %dir.path().display(), "Created workspace");
        Ok(Workspace { dir })
    }

    /// Delete everything at least `max_age_hours` old from the three areas.
    pub fn sweep(&self, max_age_hours: u64) -> SweepReport {
        self.sweep_older_than(Duration::from_secs(max_age_hours.saturating_mul(3600)))
    }

    /// Same as [`WorkspaceManager::sweep`] with an arbitrary threshold.
    pub fn sweep_older_than(&self, max_age: Duration) -> SweepReport {
        let now = SystemTime::now();
        let mut report = SweepReport::default();

        sweep_dir(&self.uploads, max_age, now, false, &mut report);
        sweep_dir(&self.temp, max_age, now, true, &mut report);
        sweep_dir(self.store.dir(), max_age, now, false, &mut report);

        tracing::info!(
            files_removed = report.files_removed,
            dirs_removed = report.dirs_removed,
            failures = report.failures,
            "Sweep finished"
        );
        report
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    pub failures: usize,
}

fn sweep_dir(
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
    remove_dirs: bool,
    report: &mut SweepReport,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot list directory for sweep");
            report.failures += 1;
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot stat entry");
                report.failures += 1;
                continue;
            }
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }

        let is_dir = metadata.is_dir();
        if is_dir && !remove_dirs {
            continue;
        }

        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match removed {
            Ok(()) if is_dir => report.dirs_removed += 1,
            Ok(()) => report.files_removed += 1,
            // Already removed by a concurrent download or operation
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to sweep entry");
                report.failures += 1;
            }
        }
    }
}

/// A per-operation scratch directory, deleted recursively on drop
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Whether `path` resolves inside this workspace
    pub fn contains(&self, path: &Path) -> bool {
        let root = match self.path().canonicalize() {
            Ok(root) => root,
            Err(_) => return false,
        };
        match path.canonicalize() {
            Ok(resolved) => resolved.starts_with(&root),
            Err(_) => false,
        }
    }

    /// Write an uploaded input as `<index>_<filename>`.
    pub async fn save_input(&self, index: usize, filename: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.join(format!("{}_{}", index, filename));
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Remove the directory now instead of waiting for drop.
    pub fn close(self) -> Result<()> {
        match self.dir.close() {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (TempDir, WorkspaceManager) {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path().join("data")).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_layout_created() {
        let (_dir, manager) = manager();
        assert!(manager.uploads_dir().is_dir());
        assert!(manager.temp_dir().is_dir());
        assert!(manager.processed_store_dir().is_dir());
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let dir = TempDir::new_in(".").unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap()).join("data");
        assert!(relative.is_relative());

        let manager = WorkspaceManager::new(&relative).unwrap();
        assert!(manager.root().is_absolute());
        assert!(manager.temp_dir().is_absolute());
        assert!(manager.processed_store_dir().is_absolute());

        let ws = manager.new_workspace().unwrap();
        assert!(ws.path().is_absolute());
        assert!(ws.path().starts_with(manager.temp_dir()));
    }

    #[tokio::test]
    async fn test_workspace_removed_on_drop() {
        let (_dir, manager) = manager();
        let path = {
            let ws = manager.new_workspace().unwrap();
            ws.save_input(0, "a.pdf", b"%PDF-1.4").await.unwrap();
            assert!(ws.join("0_a.pdf").is_file());
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_workspace_close_and_uniqueness() {
        let (_dir, manager) = manager();
        let a = manager.new_workspace().unwrap();
        let b = manager.new_workspace().unwrap();
        assert_ne!(a.path(), b.path());

        let path = a.path().to_path_buf();
        a.close().unwrap();
        assert!(!path.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn test_workspace_tolerates_missing_dir() {
        let (_dir, manager) = manager();
        let ws = manager.new_workspace().unwrap();
        fs::remove_dir_all(ws.path()).unwrap();
        drop(ws);

        let ws = manager.new_workspace().unwrap();
        fs::remove_dir_all(ws.path()).unwrap();
        ws.close().unwrap();
    }

    #[tokio::test]
    async fn test_contains() {
        let (dir, manager) = manager();
        let ws = manager.new_workspace().unwrap();
        let inside = ws.save_input(0, "a.pdf", b"x").await.unwrap();
        let outside = dir.path().join("outside.pdf");
        fs::write(&outside, b"x").unwrap();

        assert!(ws.contains(&inside));
        assert!(!ws.contains(&outside));
        assert!(!ws.contains(&ws.join("..").join("..").join("outside.pdf")));
    }

    #[test]
    fn test_sweep_zero_removes_everything() {
        let (_dir, manager) = manager();
        fs::write(manager.uploads_dir().join("u.pdf"), b"x").unwrap();
        fs::write(manager.processed_store_dir().join("p.pdf"), b"x").unwrap();
        let scratch = manager.temp_dir().join("abc");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("t.pdf"), b"x").unwrap();

        let report = manager.sweep(0);
        assert_eq!(report.files_removed, 2);
        assert_eq!(report.dirs_removed, 1);
        assert_eq!(report.failures, 0);
        assert!(!scratch.exists());
        assert_eq!(fs::read_dir(manager.processed_store_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_sweep_large_threshold_keeps_everything() {
        let (_dir, manager) = manager();
        fs::write(manager.processed_store_dir().join("p.pdf"), b"x").unwrap();
        let ws = manager.new_workspace().unwrap();

        let report = manager.sweep(24 * 365);
        assert_eq!(report, SweepReport::default());
        assert!(manager.processed_store_dir().join("p.pdf").exists());
        assert!(ws.path().exists());
    }
}
