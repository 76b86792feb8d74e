#![forbid(unsafe_code)]

mod error;
mod schema;
mod tree;
mod unit_of_work;

pub use error::StoreError;

use arbor_core::{Clock, Hierarchy, SystemClock};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DB_FILE: &str = "arbor.db";

/// The authoritative store: every node of every tree in one SQLite database.
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
    hierarchy: Hierarchy,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn open(storage_dir: impl AsRef<Path>, hierarchy: Hierarchy) -> Result<Self, StoreError> {
        Self::with_clock(storage_dir, hierarchy, Arc::new(SystemClock))
    }

    /// Opens the store with an explicit clock for server-side timestamps.
    pub fn with_clock(
        storage_dir: impl AsRef<Path>,
        hierarchy: Hierarchy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        schema::install_schema(&conn, &hierarchy)?;

        tracing::debug!(
            target: "arbor::store",
            dir = %storage_dir.display(),
            levels = hierarchy.len(),
            "store opened"
        );
        Ok(Self {
            conn,
            storage_dir,
            hierarchy,
            clock,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(DB_FILE)
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("storage_dir", &self.storage_dir)
            .field("hierarchy", &self.hierarchy)
            .finish_non_exhaustive()
    }
}
