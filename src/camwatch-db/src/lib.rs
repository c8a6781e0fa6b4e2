//! camwatch-db - Video catalog for Camwatch
//!
//! SQLite catalog of finalized clips: one row per output file, soft-deleted
//! on eviction, plus a ledger of file removals that still need retrying.

mod error;
mod migrations;
mod queries;
mod schema;
mod sync;

pub use error::DatabaseError;
pub use queries::*;
pub use schema::*;
pub use sync::{sync_with_directory, UNKNOWN_CHANNEL};

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Database connection wrapper with initialization
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening catalog at {:?}", path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets the CLI read while a recorder holds the writer
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let mut db = Self { conn };
        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory catalog");
        let conn = Connection::open_in_memory()?;

        let mut db = Self { conn };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run all pending migrations
    fn run_migrations(&mut self) -> Result<()> {
        migrations::run_all(&self.conn)?;
        Ok(())
    }
}
