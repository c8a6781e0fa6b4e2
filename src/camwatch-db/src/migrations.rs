//! Database migrations

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Current schema version
const SCHEMA_VERSION: i64 = 2;

/// Run all pending migrations
pub fn run_all(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!("running migrations from v{} to v{}", current_version, SCHEMA_VERSION);

        if current_version < 1 {
            migrate_v1(conn)?;
        }
        if current_version < 2 {
            migrate_v2(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initial schema (v1): the video catalog
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("applying migration v1: video catalog");

    conn.execute_batch(
        r#"
        -- created_at is RFC 3339 UTC with fixed precision, so text order is time order
        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY,
            filename TEXT NOT NULL UNIQUE,
            channel TEXT NOT NULL,
            created_at TEXT NOT NULL,
            filesize INTEGER NOT NULL DEFAULT 0,
            starred INTEGER NOT NULL DEFAULT 0,
            deleted_at TEXT,
            duration REAL,
            metadata TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_videos_created_at ON videos(created_at);
        CREATE INDEX IF NOT EXISTS idx_videos_channel ON videos(channel);
        CREATE INDEX IF NOT EXISTS idx_videos_active ON videos(deleted_at, starred);
    "#,
    )?;

    Ok(())
}

/// v2: files that could not be removed after eviction
fn migrate_v2(conn: &Connection) -> Result<()> {
    info!("applying migration v2: pending removals");

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS pending_removals (
            filename TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            error TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 1,
            last_attempt TEXT NOT NULL
        );
    "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('videos', 'pending_removals')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_upgrade_from_v1() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_v1(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        run_all(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
        conn.execute(
            "INSERT INTO pending_removals (filename, path, error, last_attempt) VALUES ('a', 'b', 'c', 'd')",
            [],
        )
        .unwrap();
    }
}
