//! Mirror facade.

use crate::config::MirrorConfig;
use crate::dir::MirrorDir;
use crate::error::StoreResult;
use crate::schema::ensure_schema;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The main mirror handle.
///
/// `Mirror` owns the local relational projection of the remote wiki. It
/// provides:
/// - Key-based upserts that report `Inserted`, `Updated` or `Unchanged`
/// - Row-level structural transitions (rename, delete, restore, merge)
/// - Per-stream checkpoint persistence
/// - A read-only query API for downstream consumers
///
/// # Opening a Mirror
///
/// ```rust,ignore
/// use wikimirror_store::Mirror;
/// use std::path::Path;
///
/// let mirror = Mirror::open(Path::new("enwiki-mirror"))?;
/// let stats = mirror.stats()?;
/// ```
///
/// # In-Memory Mirrors
///
/// For testing, use `Mirror::open_in_memory()`.
///
/// # Writes
///
/// Every write runs in its own short transaction covering one entity
/// key. There is no transaction spanning a whole batch: replaying any
/// prefix of a batch is harmless because every write is idempotent.
pub struct Mirror {
    /// Configuration.
    config: MirrorConfig,
    /// Mirror directory (holds the lock). None for in-memory mirrors.
    dir: Option<MirrorDir>,
    /// The SQLite connection.
    conn: Mutex<Connection>,
}

impl Mirror {
    /// Opens a mirror directory with the default configuration.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_config(path, MirrorConfig::default())
    }

    /// Opens a mirror directory with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `MirrorLocked` if another process has the mirror open, and
    /// `InvalidData` if the schema was written by a newer version.
    pub fn open_with_config(path: &Path, config: MirrorConfig) -> StoreResult<Self> {
        let dir = MirrorDir::open(path, config.create_if_missing)?;
        let conn = Connection::open(dir.database_path())?;
        conn.busy_timeout(config.busy_timeout)?;
        if config.wal {
            // journal_mode returns the resulting mode as a row
            let _mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        }
        debug!(path = %path.display(), wal = config.wal, "opened mirror");
        Self::init(conn, config, Some(dir))
    }

    /// Opens a fresh in-memory mirror for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, MirrorConfig::default(), None)
    }

    fn init(conn: Connection, config: MirrorConfig, dir: Option<MirrorDir>) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = OFF; PRAGMA synchronous = NORMAL;")?;
        ensure_schema(&conn)?;
        Ok(Self {
            config,
            dir,
            conn: Mutex::new(conn),
        })
    }

    /// Returns the mirror directory, or `None` for in-memory mirrors.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(MirrorDir::path)
    }

    /// Returns the SQLite database file, or `None` for in-memory mirrors.
    #[must_use]
    pub fn database_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(MirrorDir::database_path)
    }

    /// Returns the mirror configuration.
    #[must_use]
    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Executes a function within a write transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    pub(crate) fn write<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Executes a read-only function against the connection.
    pub(crate) fn read<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use tempfile::tempdir;

    #[test]
    fn open_in_memory() {
        let mirror = Mirror::open_in_memory().unwrap();
        assert!(mirror.path().is_none());
    }

    #[test]
    fn open_on_disk_and_reopen() {
        let temp = tempdir().unwrap();
        {
            let mirror = Mirror::open(temp.path()).unwrap();
            assert_eq!(mirror.path(), Some(temp.path()));
            assert!(mirror.database_path().unwrap().starts_with(temp.path()));
            mirror
                .write(|tx| {
                    tx.execute(
                        "INSERT INTO pages (page_id, namespace, title) VALUES (1, 0, 'A')",
                        [],
                    )?;
                    Ok(())
                })
                .unwrap();
        }
        let mirror = Mirror::open(temp.path()).unwrap();
        let count: i64 = mirror
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = Mirror::open(temp.path()).unwrap();
        assert!(matches!(
            Mirror::open(temp.path()),
            Err(StoreError::MirrorLocked)
        ));
    }

    #[test]
    fn failed_write_rolls_back() {
        let mirror = Mirror::open_in_memory().unwrap();
        let result: StoreResult<()> = mirror.write(|tx| {
            tx.execute(
                "INSERT INTO pages (page_id, namespace, title) VALUES (1, 0, 'A')",
                [],
            )?;
            Err(StoreError::invalid_data("boom"))
        });
        assert!(result.is_err());
        let count: i64 = mirror
            .read(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
