//! Embedded SQLite store.
//!
//! A single connection shared by every component, guarded by a mutex
//! (SQLite serialises writers anyway). Guards are never held across an
//! `.await`.

mod migrations;

pub use migrations::MIGRATIONS;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database file, creating parent directories
    /// and applying pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        info!(path = %path.display(), "Database opened");
        Self::from_connection(conn)
    }

    /// Fresh migrated in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to configure database")?;
        let applied = migrations::apply(&mut conn)?;
        debug!(applied, "Migrations applied");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Locks the shared connection.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}
