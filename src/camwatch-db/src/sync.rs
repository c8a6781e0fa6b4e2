//! Reconcile the catalog with the clips present on disk

use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use camwatch_processing::{parse_clip_name, strip_extension};

use crate::error::DatabaseError;
use crate::queries::{insert_video, list_active_videos, mark_video_deleted, video_exists};
use crate::schema::{NewVideo, SyncReport};

/// Channel recorded for clips whose filename cannot be parsed
pub const UNKNOWN_CHANNEL: &str = "unknown";

/// Add untracked clip files in `dir` and soft-delete records whose file is
/// gone.
///
/// Files that already have a record, deleted or not, are left alone; a
/// deleted record with a lingering file belongs to the removal sweep.
pub fn sync_with_directory(conn: &Connection, dir: &Path) -> Result<SyncReport> {
    if !dir.is_dir() {
        return Err(DatabaseError::NotFound(format!("videos directory {}", dir.display())).into());
    }

    let mut report = SyncReport::default();
    let tx = conn.unchecked_transaction()?;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if strip_extension(filename).is_none() || !path.is_file() {
            continue;
        }
        if video_exists(&tx, filename)? {
            continue;
        }

        let meta = entry.metadata()?;
        let (channel, created_at) = match parse_clip_name(filename) {
            Ok(name) => (name.channel, name.created.with_timezone(&Utc)),
            Err(_) => {
                warn!("clip {} has no parsable name, using file time", filename);
                let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
                (UNKNOWN_CHANNEL.to_string(), modified)
            }
        };

        insert_video(
            &tx,
            &NewVideo {
                filename: filename.to_string(),
                channel,
                created_at,
                filesize: meta.len(),
                duration: None,
                metadata: None,
            },
        )?;
        debug!("catalogued untracked clip {}", filename);
        report.added.push(filename.to_string());
    }

    for video in list_active_videos(&tx, None)? {
        if !dir.join(&video.filename).exists() && mark_video_deleted(&tx, &video.filename)? {
            debug!("clip {} missing from disk, marked deleted", video.filename);
            report.removed.push(video.filename);
        }
    }

    tx.commit()?;
    report.added.sort();

    if !report.added.is_empty() || !report.removed.is_empty() {
        info!(
            "catalog sync: {} added, {} removed",
            report.added.len(),
            report.removed.len()
        );
    }
    Ok(report)
}
