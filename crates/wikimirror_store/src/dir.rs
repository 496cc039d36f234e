//! Mirror directory management.
//!
//! A mirror lives in its own directory:
//!
//! ```text
//! <mirror_path>/
//! ├─ LOCK              # Advisory lock for the single syncing process
//! └─ mirror.sqlite3    # The relational mirror
//! ```
//!
//! The LOCK file ensures only one process can run sync passes against a
//! mirror at a time. Readers may open `mirror.sqlite3` directly.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DATABASE_FILE: &str = "mirror.sqlite3";

/// Holds the exclusive lock on a mirror directory.
#[derive(Debug)]
pub struct MirrorDir {
    path: PathBuf,
    _lock_file: File,
}

impl MirrorDir {
    /// Opens or creates a mirror directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `MirrorLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::invalid_path(format!(
                    "mirror directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::invalid_path(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::MirrorLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the mirror directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the SQLite database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.path.join(DATABASE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("mirror");
        let dir = MirrorDir::open(&path, true).unwrap();
        assert!(path.is_dir());
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.database_path(), path.join(DATABASE_FILE));
    }

    #[test]
    fn missing_directory_without_create() {
        let temp = tempdir().unwrap();
        let err = MirrorDir::open(&temp.path().join("nope"), false).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = MirrorDir::open(temp.path(), true).unwrap();
        let second = MirrorDir::open(temp.path(), true);
        assert!(matches!(second, Err(StoreError::MirrorLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(MirrorDir::open(temp.path(), true).unwrap());
        assert!(MirrorDir::open(temp.path(), true).is_ok());
    }
}
