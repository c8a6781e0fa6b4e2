//! Storage quota enforcement
//!
//! Two tiers, each with its own byte limit. Routine eviction only touches
//! non-starred videos; starred videos go only when the starred tier itself
//! is over its limit. Eviction runs oldest first until usage is back at the
//! target share of the limit.
//!
//! A record is soft-deleted even when its file cannot be removed; the file
//! is remembered in the pending-removal ledger and retried at the start of
//! every later pass.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use camwatch_db::{
    clear_removal_failure, get_space_usage, insert_video, list_active_videos, list_removal_failures,
    mark_video_deleted, record_removal_failure, Database, NewVideo, SpaceUsage, VideoRecord,
};
use camwatch_processing::FinalizedClip;

use crate::config::StorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaTier {
    Total,
    Starred,
}

impl fmt::Display for QuotaTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaTier::Total => f.write_str("total"),
            QuotaTier::Starred => f.write_str("starred"),
        }
    }
}

/// Usage of one tier above its warning threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaWarning {
    pub tier: QuotaTier,
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl QuotaWarning {
    pub fn percent(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 100.0;
        }
        self.used_bytes as f64 * 100.0 / self.limit_bytes as f64
    }
}

impl fmt::Display for QuotaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} storage at {:.1}% ({} of {} bytes)",
            self.tier,
            self.percent(),
            self.used_bytes,
            self.limit_bytes
        )
    }
}

/// Result of one enforcement pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaReport {
    /// Evicted filenames, in eviction order
    pub evicted: Vec<String>,
    /// Warnings computed from usage before eviction
    pub warnings: Vec<QuotaWarning>,
}

pub struct QuotaManager {
    db: Arc<Mutex<Database>>,
    videos_dir: PathBuf,
    config: StorageConfig,
}

impl QuotaManager {
    pub fn new(db: Arc<Mutex<Database>>, videos_dir: impl Into<PathBuf>, config: StorageConfig) -> Self {
        Self {
            db,
            videos_dir: videos_dir.into(),
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        // A panic elsewhere leaves the catalog itself consistent
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bytes used by non-deleted videos, total and starred
    pub fn space_usage(&self) -> Result<SpaceUsage> {
        let db = self.lock();
        get_space_usage(db.connection())
    }

    /// Tiers currently above their warning threshold
    pub fn warnings(&self) -> Result<Vec<QuotaWarning>> {
        let usage = self.space_usage()?;
        Ok(self.warnings_for(&usage))
    }

    fn warnings_for(&self, usage: &SpaceUsage) -> Vec<QuotaWarning> {
        let tiers = [
            (QuotaTier::Total, usage.total_bytes, self.config.total_limit_bytes),
            (QuotaTier::Starred, usage.starred_bytes, self.config.starred_limit_bytes),
        ];
        tiers
            .into_iter()
            .filter(|&(_, used, limit)| used as f64 > self.config.warn_ratio * limit as f64)
            .map(|(tier, used_bytes, limit_bytes)| QuotaWarning {
                tier,
                used_bytes,
                limit_bytes,
            })
            .collect()
    }

    /// Catalog every file of a finalized clip
    pub fn record_clip(&self, clip: &FinalizedClip) -> Result<Vec<i64>> {
        let db = self.lock();
        let conn = db.connection();
        let mut ids = Vec::with_capacity(clip.files.len());
        for video in NewVideo::from_clip(clip) {
            ids.push(insert_video(conn, &video)?);
            debug!("catalogued {}", video.filename);
        }
        Ok(ids)
    }

    /// Retry removals that failed in earlier passes. Returns how many were
    /// cleared.
    pub fn reconcile_removals(&self) -> Result<usize> {
        let db = self.lock();
        reconcile(db.connection())
    }

    /// Run one enforcement pass over both tiers
    pub fn enforce_quota(&self) -> Result<QuotaReport> {
        let db = self.lock();
        let conn = db.connection();

        reconcile(conn)?;

        let usage = get_space_usage(conn)?;
        let mut report = QuotaReport {
            evicted: Vec::new(),
            warnings: self.warnings_for(&usage),
        };
        for warning in &report.warnings {
            warn!("{}", warning);
        }

        if usage.total_bytes > self.config.total_limit_bytes {
            let candidates = list_active_videos(conn, Some(false))?;
            self.evict_until(
                conn,
                QuotaTier::Total,
                candidates,
                usage.total_bytes,
                self.config.total_limit_bytes,
                &mut report.evicted,
            )?;
        }

        let usage = get_space_usage(conn)?;
        if usage.starred_bytes > self.config.starred_limit_bytes {
            let candidates = list_active_videos(conn, Some(true))?;
            self.evict_until(
                conn,
                QuotaTier::Starred,
                candidates,
                usage.starred_bytes,
                self.config.starred_limit_bytes,
                &mut report.evicted,
            )?;
        }

        if !report.evicted.is_empty() {
            info!("quota enforcement evicted {} video(s)", report.evicted.len());
        }
        Ok(report)
    }

    fn evict_until(
        &self,
        conn: &Connection,
        tier: QuotaTier,
        candidates: Vec<VideoRecord>,
        mut used: u64,
        limit: u64,
        evicted: &mut Vec<String>,
    ) -> Result<()> {
        let target = self.config.target_ratio * limit as f64;
        info!(
            "{} usage {} bytes over limit {}, evicting down to {:.0}",
            tier, used, limit, target
        );

        for video in candidates {
            if used as f64 <= target {
                break;
            }
            self.evict(conn, &video)?;
            used = used.saturating_sub(video.filesize);
            evicted.push(video.filename);
        }

        if used as f64 > target {
            warn!("{} usage still {} bytes after evicting every candidate", tier, used);
        }
        Ok(())
    }

    fn evict(&self, conn: &Connection, video: &VideoRecord) -> Result<()> {
        let path = self.videos_dir.join(&video.filename);
        if let Err(e) = remove_file(&path) {
            warn!("failed to remove {:?}: {}", path, e);
            record_removal_failure(conn, &video.filename, &path.to_string_lossy(), &e.to_string())?;
        }
        mark_video_deleted(conn, &video.filename)?;
        debug!("evicted {} ({} bytes)", video.filename, video.filesize);
        Ok(())
    }
}

/// Remove a file; a file that is already gone counts as removed
fn remove_file(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn reconcile(conn: &Connection) -> Result<usize> {
    let mut cleared = 0;
    for failure in list_removal_failures(conn)? {
        match remove_file(Path::new(&failure.path)) {
            Ok(()) => {
                clear_removal_failure(conn, &failure.filename)?;
                cleared += 1;
            }
            Err(e) => {
                debug!("removal of {} still failing: {}", failure.path, e);
                record_removal_failure(conn, &failure.filename, &failure.path, &e.to_string())?;
            }
        }
    }
    if cleared > 0 {
        info!("reconciled {} pending removal(s)", cleared);
    }
    Ok(cleared)
}
