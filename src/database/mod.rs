//! Alert history database
//!
//! SQLite storage for every SOS that was dispatched, one row per contact.
//! Database is stored at `~/.tripguard/tripguard.db`.

pub mod alerts;
pub mod migrations;
pub mod schema;

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use crate::database::migrations::run_migrations;

pub use alerts::{AlertRecord, AlertStatus};

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid alert status: {0}")]
    InvalidStatus(String),
}

/// Returns the path to the database file (~/.tripguard/tripguard.db)
pub fn get_database_path() -> PathBuf {
    crate::config::get_config_dir().join("tripguard.db")
}

/// Handle to the alert history database
///
/// Owns a single connection behind a mutex; every operation is short and
/// runs on the caller's thread.
pub struct AlertLog {
    conn: Mutex<Connection>,
}

impl AlertLog {
    /// Opens (creating if needed) the database at `path` and runs migrations
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                tracing::info!("Created database directory at {:?}", dir);
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!("Alert history database: {:?}", path);
        Self::initialise(conn)
    }

    /// Opens the database at the default location
    pub fn open_default() -> Result<Self, DatabaseError> {
        Self::open(&get_database_path())
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::initialise(Connection::open_in_memory()?)
    }

    fn initialise(mut conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}
