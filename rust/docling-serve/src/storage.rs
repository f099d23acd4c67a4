//! Process-owned scratch storage for staged outputs and archives.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Root scratch directory with per-task subdirectories.
///
/// When no path is configured, a private temp directory is created and
/// removed when the store is dropped at shutdown. A configured path is left
/// in place across restarts.
#[derive(Debug)]
pub struct ScratchStore {
    root: PathBuf,
    // Held only to tie the tempdir's lifetime to the store.
    _tempdir: Option<TempDir>,
}

impl ScratchStore {
    /// Open the scratch store at `path`, or create a private temp dir.
    pub fn new(path: Option<&Path>) -> std::io::Result<Self> {
        match path {
            Some(path) => {
                std::fs::create_dir_all(path)?;
                Ok(Self {
                    root: path.to_path_buf(),
                    _tempdir: None,
                })
            }
            None => {
                let tempdir = tempfile::Builder::new().prefix("docling_").tempdir()?;
                Ok(Self {
                    root: tempdir.path().to_path_buf(),
                    _tempdir: Some(tempdir),
                })
            }
        }
    }

    /// The scratch root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The scratch directory owned by a task. Not created here: workers
    /// create it lazily only when staging files.
    #[must_use]
    pub fn task_path(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }
}
