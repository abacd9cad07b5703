//! Connection ownership and lifecycle.
//!
//! A [`Store`] is created once (per process, or per test) and passed by
//! handle to whoever needs it. There is no global instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};

use crate::error::Result;
use crate::migrations;

/// Shared handle to the chat database.
///
/// Cloning is cheap; all clones talk to the same connection. Calls from
/// concurrent tasks are serialized on an internal mutex, so every public
/// operation observes and leaves a consistent database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a database file at `path`, creating parent
    /// directories as needed, and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`](crate::StoreError::Io) if the parent
    /// directory cannot be created, or a storage/migration error if SQLite
    /// cannot open or upgrade the file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening chat database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a fresh, private in-memory database.
    ///
    /// Every call returns an isolated instance, which is what tests want.
    ///
    /// # Errors
    ///
    /// Returns a storage or migration error if SQLite cannot initialize.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Filesystem path of the database, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction that commits only if `f` returns `Ok`.
    ///
    /// Dropping the transaction on the error path rolls it back.
    pub(crate) fn with_tx<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
