//! SQLite backend.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex and
//! guarantees that migrations are run before any other operation. Each
//! collection lives in a single row, so every save rewrites the whole
//! collection.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::collections::{Collection, CollectionStore};
use crate::error::{Result, StoreError};
use crate::migrations;

pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/mimigram/mimigram.db`
    /// - macOS:   `~/Library/Application Support/com.mimigram.mimigram/mimigram.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\mimigram\mimigram\data\mimigram.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    /// Path [`Database::new`] opens.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "mimigram", "mimigram").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("mimigram.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory SQLite database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Lock and return the underlying connection.
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Filesystem path of the open database (`None` when in memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl CollectionStore for Database {
    fn load(&self, collection: Collection) -> Result<Option<String>> {
        let conn = self.conn()?;
        let data = conn
            .query_row(
                "SELECT data FROM collections WHERE name = ?1",
                params![collection.name()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(data)
    }

    fn save(&self, collection: Collection, json: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO collections (name, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![collection.name(), json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}
