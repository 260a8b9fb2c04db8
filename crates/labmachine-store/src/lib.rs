//! Durable storage for lab state descriptors.
//!
//! This crate provides the State Store: a versioned, checksummed JSON
//! `document` envelope around `LabState`, the `StateBackend` trait with a
//! compare-and-swap write primitive, an atomic local `FileBackend` guarded by
//! an advisory `StateLock`, the `StateStore` front end implementing
//! create/push/pull/clean with optimistic concurrency on `version`, and the
//! `labmachine.toml` pointer file mapping lab names to state locators.

pub mod backend;
pub mod document;
pub mod file;
pub mod locator;
pub mod lock;
pub mod pointer;
pub mod store;

pub use backend::{check_expected_version, StateBackend};
pub use document::{decode_state, encode_state, peek_version, STATE_FORMAT_VERSION};
pub use file::FileBackend;
pub use locator::StateLocator;
pub use lock::StateLock;
pub use pointer::{LabPointers, POINTER_FILE};
pub use store::StateStore;

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Directory that holds `path`, treating a bare file name as the current directory.
pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Write `data` to `dest` through a synced temp file in the same directory.
pub fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = parent_dir(dest);
    std::fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(&dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] labmachine_schema::SchemaError),
    #[error("no lab state at {0}")]
    NotFound(String),
    #[error("lab state already exists at {0}")]
    AlreadyExists(String),
    #[error("stale write to {locator}: pushed from version {expected}, store is at version {found}")]
    StaleWrite {
        locator: String,
        expected: u64,
        found: u64,
    },
    #[error("integrity check failed for state at {locator}: expected {expected}, got {actual}")]
    IntegrityFailure {
        locator: String,
        expected: String,
        actual: String,
    },
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("invalid state locator '{0}'")]
    InvalidLocator(String),
    #[error("remote state error: {0}")]
    Remote(String),
    #[error("bucket {0} does not exist")]
    BucketNotFound(String),
    #[error("access to {0} denied, check the access token")]
    Forbidden(String),
    #[error("pointer file error: {0}")]
    Pointer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_dir_of_bare_name_is_cwd() {
        assert_eq!(parent_dir(Path::new("state.json")), PathBuf::from("."));
        assert_eq!(
            parent_dir(Path::new("/tmp/labs/state.json")),
            PathBuf::from("/tmp/labs")
        );
    }

    #[test]
    fn write_atomic_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("state.json");
        write_atomic(&dest, b"one").unwrap();
        write_atomic(&dest, b"two").unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"two");
        let leftovers = std::fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1, "temp files must not be left behind");
    }

    #[test]
    fn store_error_display_stale_write() {
        let e = StoreError::StaleWrite {
            locator: "state.json".to_owned(),
            expected: 1,
            found: 2,
        };
        let msg = e.to_string();
        assert!(msg.contains("state.json"));
        assert!(msg.contains("version 1"));
        assert!(msg.contains("version 2"));
    }

    #[test]
    fn store_error_display_not_found() {
        let e = StoreError::NotFound("http://example/state/demo".to_owned());
        assert!(e.to_string().contains("http://example/state/demo"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        let msg = e.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('7'));
    }
}
