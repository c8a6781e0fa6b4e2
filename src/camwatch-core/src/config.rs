//! Configuration
//!
//! TOML file with one table per concern; every field has a default so a
//! missing file or a partial one is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use camwatch_capture::{SamplerConfig, DEFAULT_QUEUE_CAPACITY};
use camwatch_processing::{DetectorConfig, VideoFormat, WriterConfig};

const GIB: u64 = 1024 * 1024 * 1024;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Camera sources started by `camwatch run`
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

/// General settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory for videos and catalog (defaults to the platform
    /// local data dir)
    pub data_dir: Option<PathBuf>,
}

/// Ingestion queue and sampler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,

    #[serde(default = "default_rate_offset")]
    pub rate_offset: usize,

    #[serde(default = "default_rate_step")]
    pub rate_step: usize,

    /// Sleep between polls of an empty queue
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

/// Motion detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_motion_area_threshold")]
    pub motion_area_threshold: f64,

    #[serde(default = "default_cumulative_motion_threshold")]
    pub cumulative_motion_threshold: f64,

    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,

    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u32,
}

/// Recording and encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_max_clip_secs")]
    pub max_clip_secs: f64,

    #[serde(default = "default_motionless_frame_cap")]
    pub motionless_frame_cap: u32,

    #[serde(default = "default_formats")]
    pub formats: Vec<VideoFormat>,

    /// CRF value, lower is better
    #[serde(default = "default_quality")]
    pub quality: u32,
}

/// Disk quota settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_total_limit")]
    pub total_limit_bytes: u64,

    #[serde(default = "default_starred_limit")]
    pub starred_limit_bytes: u64,

    /// Eviction stops once usage is at or below this share of the limit
    #[serde(default = "default_ratio")]
    pub target_ratio: f64,

    /// Usage above this share of a limit raises a warning
    #[serde(default = "default_ratio")]
    pub warn_ratio: f64,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

/// One camera source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub channel: String,

    /// Directory of encoded images replayed as frames
    pub source: PathBuf,

    #[serde(default = "default_capture_delay_ms")]
    pub capture_delay_ms: u64,

    /// Start over after the last image
    #[serde(default)]
    pub repeat: bool,
}

// Default value functions
fn default_queue_capacity() -> usize { DEFAULT_QUEUE_CAPACITY }
fn default_low_water_mark() -> usize { 500 }
fn default_rate_offset() -> usize { 400 }
fn default_rate_step() -> usize { 100 }
fn default_idle_poll_ms() -> u64 { 10 }
fn default_motion_area_threshold() -> f64 { 2500.0 }
fn default_cumulative_motion_threshold() -> f64 { 50.0 }
fn default_pixel_threshold() -> u8 { 25 }
fn default_blur_sigma() -> f32 { 3.5 }
fn default_dilate_iterations() -> u32 { 2 }
fn default_max_clip_secs() -> f64 { 60.0 }
fn default_motionless_frame_cap() -> u32 { 20 }
fn default_formats() -> Vec<VideoFormat> { vec![VideoFormat::Webm] }
fn default_quality() -> u32 { 30 }
fn default_total_limit() -> u64 { 50 * GIB }
fn default_starred_limit() -> u64 { 10 * GIB }
fn default_ratio() -> f64 { 0.9 }
fn default_check_interval() -> u64 { 300 }
fn default_capture_delay_ms() -> u64 { 100 }

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            low_water_mark: default_low_water_mark(),
            rate_offset: default_rate_offset(),
            rate_step: default_rate_step(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            motion_area_threshold: default_motion_area_threshold(),
            cumulative_motion_threshold: default_cumulative_motion_threshold(),
            pixel_threshold: default_pixel_threshold(),
            blur_sigma: default_blur_sigma(),
            dilate_iterations: default_dilate_iterations(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_clip_secs: default_max_clip_secs(),
            motionless_frame_cap: default_motionless_frame_cap(),
            formats: default_formats(),
            quality: default_quality(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            total_limit_bytes: default_total_limit(),
            starred_limit_bytes: default_starred_limit(),
            target_ratio: default_ratio(),
            warn_ratio: default_ratio(),
            check_interval_secs: default_check_interval(),
        }
    }
}

impl IngestConfig {
    pub fn sampler(&self) -> SamplerConfig {
        SamplerConfig {
            low_water_mark: self.low_water_mark,
            rate_offset: self.rate_offset,
            rate_step: self.rate_step,
        }
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl DetectionConfig {
    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            motion_area_threshold: self.motion_area_threshold,
            cumulative_motion_threshold: self.cumulative_motion_threshold,
            pixel_threshold: self.pixel_threshold,
            blur_sigma: self.blur_sigma,
            dilate_iterations: self.dilate_iterations,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {:?}", path.as_ref()))?;
        let config: Config = toml::from_str(&content).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.recording.formats.is_empty() {
            anyhow::bail!("recording.formats must name at least one format");
        }
        if self.ingest.queue_capacity == 0 {
            anyhow::bail!("ingest.queue_capacity must be positive");
        }
        for (name, ratio) in [
            ("storage.target_ratio", self.storage.target_ratio),
            ("storage.warn_ratio", self.storage.warn_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                anyhow::bail!("{} must be in (0, 1], got {}", name, ratio);
            }
        }
        Ok(())
    }

    /// Resolve data directory with fallback to default
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.general.data_dir {
            dir.clone()
        } else {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("camwatch")
        }
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.resolve_data_dir().join("videos")
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve_data_dir().join("camwatch.db")
    }

    pub fn writer(&self) -> WriterConfig {
        WriterConfig {
            output_dir: self.videos_dir(),
            formats: self.recording.formats.clone(),
            quality: self.recording.quality,
        }
    }
}
