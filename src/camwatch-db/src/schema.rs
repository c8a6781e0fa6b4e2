//! Database schema types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use camwatch_processing::FinalizedClip;

/// Catalog entry for one clip file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: i64,
    pub filename: String,
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub filesize: u64,
    pub starred: bool,
    /// Set when the video was evicted or deleted by a user
    pub deleted_at: Option<DateTime<Utc>>,
    /// Clip length in seconds
    pub duration: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

impl VideoRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// New video to insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideo {
    pub filename: String,
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub filesize: u64,
    pub duration: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

impl NewVideo {
    /// One catalog entry per file written for a finalized clip
    pub fn from_clip(clip: &FinalizedClip) -> Vec<NewVideo> {
        clip.files
            .iter()
            .map(|file| NewVideo {
                filename: file.filename.clone(),
                channel: clip.channel.clone(),
                created_at: clip.created_at.with_timezone(&Utc),
                filesize: file.filesize,
                duration: Some(clip.duration_secs),
                metadata: Some(json!({
                    "format": file.format,
                    "fps": clip.fps,
                    "frame_count": clip.frame_count,
                })),
            })
            .collect()
    }
}

/// Bytes used by non-deleted videos
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceUsage {
    pub total_bytes: u64,
    pub starred_bytes: u64,
}

/// A file whose removal failed after its record was soft-deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalFailure {
    pub filename: String,
    pub path: String,
    pub error: String,
    pub attempts: i64,
    pub last_attempt: DateTime<Utc>,
}

/// Outcome of reconciling the catalog with the videos directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files found on disk without a catalog entry
    pub added: Vec<String>,
    /// Records whose file no longer exists
    pub removed: Vec<String>,
}
