use crate::backend::{check_expected_version, StateBackend};
use crate::document::peek_version;
use crate::lock::StateLock;
use crate::{fsync_dir, parent_dir, write_atomic, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// State document stored in a local file.
///
/// Writers take an exclusive lock on `<path>.lock`, re-read the stored
/// version, and replace the file through a temp file + rename, so readers
/// never observe a half-written document.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn current_version(&self) -> Result<Option<u64>, StoreError> {
        self.load()?.map(|data| peek_version(&data)).transpose()
    }
}

impl StateBackend for FileBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn compare_and_swap(&self, expected: Option<u64>, data: &[u8]) -> Result<(), StoreError> {
        let _lock = StateLock::acquire(&self.lock_path())?;
        let current = self.current_version()?;
        check_expected_version(&self.describe(), expected, current)?;
        debug!(
            "writing {} ({} bytes, expected version {expected:?})",
            self.path.display(),
            data.len()
        );
        write_atomic(&self.path, data)
    }

    fn remove(&self) -> Result<bool, StoreError> {
        let lock_path = self.lock_path();
        let removed = {
            let _lock = StateLock::acquire(&lock_path)?;
            if self.path.exists() {
                fs::remove_file(&self.path)?;
                fsync_dir(&parent_dir(&self.path))?;
                true
            } else {
                false
            }
        };
        let _ = fs::remove_file(lock_path);
        Ok(removed)
    }
}
