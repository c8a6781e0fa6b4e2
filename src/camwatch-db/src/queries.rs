//! Database query functions

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::schema::*;

const VIDEO_COLUMNS: &str =
    "id, filename, channel, created_at, filesize, starred, deleted_at, duration, metadata";

/// Insert a video, replacing any earlier record with the same filename.
///
/// A clip written in the same second as a previous one of the same channel
/// overwrites that file on disk, so the record is revived with the new
/// values rather than rejected.
pub fn insert_video(conn: &Connection, video: &NewVideo) -> Result<i64> {
    let metadata = video
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let id = conn.query_row(
        r#"INSERT INTO videos (filename, channel, created_at, filesize, duration, metadata)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(filename) DO UPDATE SET
               channel = excluded.channel,
               created_at = excluded.created_at,
               filesize = excluded.filesize,
               duration = excluded.duration,
               metadata = excluded.metadata,
               starred = 0,
               deleted_at = NULL
           RETURNING id"#,
        params![
            video.filename,
            video.channel,
            format_datetime(&video.created_at),
            video.filesize as i64,
            video.duration,
            metadata,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Get a non-deleted video by filename
pub fn get_video_info(conn: &Connection, filename: &str) -> Result<Option<VideoRecord>> {
    let sql = format!(
        "SELECT {} FROM videos WHERE filename = ?1 AND deleted_at IS NULL",
        VIDEO_COLUMNS
    );
    let video = conn
        .query_row(&sql, params![filename], row_to_video)
        .optional()?;
    Ok(video)
}

/// Whether any record (deleted or not) exists for a filename
pub fn video_exists(conn: &Connection, filename: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM videos WHERE filename = ?1)",
        params![filename],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Soft-delete a video. Returns false if it was missing or already deleted.
pub fn mark_video_deleted(conn: &Connection, filename: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET deleted_at = ?2 WHERE filename = ?1 AND deleted_at IS NULL",
        params![filename, format_datetime(&Utc::now())],
    )?;
    Ok(changed > 0)
}

/// Set or clear the starred flag on a non-deleted video
pub fn set_starred(conn: &Connection, filename: &str, starred: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE videos SET starred = ?2 WHERE filename = ?1 AND deleted_at IS NULL",
        params![filename, starred],
    )?;
    Ok(changed > 0)
}

/// Replace duration and metadata of a non-deleted video
pub fn update_video_metadata(
    conn: &Connection,
    filename: &str,
    duration: Option<f64>,
    metadata: Option<&serde_json::Value>,
) -> Result<bool> {
    let metadata = metadata.map(serde_json::to_string).transpose()?;
    let changed = conn.execute(
        "UPDATE videos SET duration = ?2, metadata = ?3 WHERE filename = ?1 AND deleted_at IS NULL",
        params![filename, duration, metadata],
    )?;
    Ok(changed > 0)
}

/// Total and starred bytes of non-deleted videos
pub fn get_space_usage(conn: &Connection) -> Result<SpaceUsage> {
    let (total, starred): (i64, i64) = conn.query_row(
        r#"SELECT COALESCE(SUM(filesize), 0),
                  COALESCE(SUM(CASE WHEN starred != 0 THEN filesize ELSE 0 END), 0)
           FROM videos WHERE deleted_at IS NULL"#,
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(SpaceUsage {
        total_bytes: total.max(0) as u64,
        starred_bytes: starred.max(0) as u64,
    })
}

/// Non-deleted videos, oldest first, optionally filtered by starred flag
pub fn list_active_videos(conn: &Connection, starred: Option<bool>) -> Result<Vec<VideoRecord>> {
    let videos = match starred {
        Some(flag) => {
            let sql = format!(
                "SELECT {} FROM videos WHERE deleted_at IS NULL AND starred = ?1 ORDER BY created_at ASC, id ASC",
                VIDEO_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![flag], row_to_video)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM videos WHERE deleted_at IS NULL ORDER BY created_at ASC, id ASC",
                VIDEO_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_video)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(videos)
}

/// Count non-deleted videos per channel
pub fn get_channel_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        r#"SELECT channel, COUNT(*) FROM videos
           WHERE deleted_at IS NULL
           GROUP BY channel ORDER BY channel"#,
    )?;
    let counts = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

/// Remember a failed file removal, bumping the attempt count on repeats
pub fn record_removal_failure(conn: &Connection, filename: &str, path: &str, error: &str) -> Result<()> {
    conn.execute(
        r#"INSERT INTO pending_removals (filename, path, error, attempts, last_attempt)
           VALUES (?1, ?2, ?3, 1, ?4)
           ON CONFLICT(filename) DO UPDATE SET
               path = excluded.path,
               error = excluded.error,
               attempts = attempts + 1,
               last_attempt = excluded.last_attempt"#,
        params![filename, path, error, format_datetime(&Utc::now())],
    )?;
    Ok(())
}

pub fn list_removal_failures(conn: &Connection) -> Result<Vec<RemovalFailure>> {
    let mut stmt = conn.prepare(
        "SELECT filename, path, error, attempts, last_attempt FROM pending_removals ORDER BY filename",
    )?;
    let failures = stmt
        .query_map([], |row| {
            Ok(RemovalFailure {
                filename: row.get(0)?,
                path: row.get(1)?,
                error: row.get(2)?,
                attempts: row.get(3)?,
                last_attempt: parse_datetime(row, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(failures)
}

pub fn clear_removal_failure(conn: &Connection, filename: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM pending_removals WHERE filename = ?1",
        params![filename],
    )?;
    Ok(changed > 0)
}

// Helper functions

/// Fixed-precision RFC 3339 so stored timestamps sort as text
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_video(row: &Row) -> rusqlite::Result<VideoRecord> {
    let deleted_at: Option<String> = row.get(6)?;
    let metadata: Option<String> = row.get(8)?;

    Ok(VideoRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        channel: row.get(2)?,
        created_at: parse_datetime(row, 3)?,
        filesize: row.get::<_, i64>(4)?.max(0) as u64,
        starred: row.get::<_, i32>(5)? != 0,
        deleted_at: deleted_at
            .map(|s| parse_datetime_str(&s, 6))
            .transpose()?,
        duration: row.get(7)?,
        metadata: metadata
            .map(|s| {
                serde_json::from_str(&s).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
                })
            })
            .transpose()?,
    })
}

fn parse_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_datetime_str(&s, idx)
}

fn parse_datetime_str(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
