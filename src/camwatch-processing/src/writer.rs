//! Per-recording frame buffer and clip finalization
//!
//! Frames are buffered in memory for the length of one recording. On
//! finalize the buffer is encoded once per configured format, at a frame
//! rate derived from the observed capture cadence rather than a fixed one:
//! the sampler drops frames irregularly, so only `frames / elapsed` plays
//! back in real time.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local, Timelike};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::encoder::{ClipEncoder, EncodeJob, VideoFormat};
use crate::error::ProcessingError;
use crate::naming::clip_stem;

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Directory receiving finished clips
    pub output_dir: PathBuf,
    /// One output file per format
    pub formats: Vec<VideoFormat>,
    /// CRF value handed to the encoder
    pub quality: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("videos"),
            formats: vec![VideoFormat::Webm],
            quality: 30,
        }
    }
}

/// One encoded output file
#[derive(Debug, Clone, PartialEq)]
pub struct ClipFile {
    pub filename: String,
    pub path: PathBuf,
    pub format: VideoFormat,
    pub filesize: u64,
}

/// A finished recording, reported to the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedClip {
    pub channel: String,
    /// Local wall time of the first frame, whole seconds
    pub created_at: DateTime<Local>,
    pub duration_secs: f64,
    pub frame_count: usize,
    pub fps: f64,
    pub files: Vec<ClipFile>,
}

pub struct VideoWriter {
    channel: String,
    config: WriterConfig,
    encoder: Arc<dyn ClipEncoder>,
    frames: Vec<RgbImage>,
    resolution: Option<(u32, u32)>,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl VideoWriter {
    pub fn new(channel: impl Into<String>, config: WriterConfig, encoder: Arc<dyn ClipEncoder>) -> Self {
        Self {
            channel: channel.into(),
            config,
            encoder,
            frames: Vec::new(),
            resolution: None,
            first_at: None,
            last_at: None,
        }
    }

    /// Buffer a frame. The first frame fixes the clip resolution.
    pub fn add_frame(&mut self, image: RgbImage, timestamp: Instant) {
        if self.resolution.is_none() {
            self.resolution = Some(image.dimensions());
            self.first_at = Some(timestamp);
        }
        self.last_at = Some(timestamp);
        self.frames.push(image);
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    /// Time between the first and last buffered frame, in seconds
    pub fn elapsed_secs(&self) -> Option<f64> {
        match (self.first_at, self.last_at) {
            (Some(first), Some(last)) => Some(last.saturating_duration_since(first).as_secs_f64()),
            _ => None,
        }
    }

    /// Observed frame rate, or `None` when no time has elapsed
    pub fn fps(&self) -> Option<f64> {
        let elapsed = self.elapsed_secs()?;
        if elapsed <= 0.0 {
            return None;
        }
        Some(self.frames.len() as f64 / elapsed)
    }

    /// Encode the buffer into one file per configured format.
    ///
    /// Returns `Ok(None)` without touching the filesystem when the buffer
    /// spans no time. A format that fails to encode is skipped; the call
    /// fails only if every format does.
    pub fn write(&self) -> Result<Option<FinalizedClip>, ProcessingError> {
        let (Some(fps), Some((width, height)), Some(first_at)) =
            (self.fps(), self.resolution, self.first_at)
        else {
            info!(
                "channel {}: {} frame(s) span no time, no clip written",
                self.channel,
                self.frames.len()
            );
            return Ok(None);
        };

        let created_at = wall_time_of(first_at);
        let stem = clip_stem(&self.channel, &created_at);
        fs::create_dir_all(&self.config.output_dir)?;

        let frames = self.uniform_frames(width, height);
        let mut files = Vec::with_capacity(self.config.formats.len());
        let mut last_error = None;

        for &format in &self.config.formats {
            let filename = format!("{}.{}", stem, format.extension());
            let job = EncodeJob {
                output: self.config.output_dir.join(&filename),
                format,
                width,
                height,
                fps,
                quality: self.config.quality,
            };

            let result = self
                .encoder
                .encode(&job, &frames)
                .and_then(|()| Ok(fs::metadata(&job.output)?.len()));
            match result {
                Ok(filesize) => files.push(ClipFile {
                    filename,
                    path: job.output,
                    format,
                    filesize,
                }),
                Err(e) => {
                    warn!("failed to write {} clip {}: {}", format, filename, e);
                    last_error = Some(e);
                }
            }
        }

        if files.is_empty() {
            return Err(last_error.unwrap_or(ProcessingError::NoFrames));
        }

        let clip = FinalizedClip {
            channel: self.channel.clone(),
            created_at,
            duration_secs: self.elapsed_secs().unwrap_or_default(),
            frame_count: self.frames.len(),
            fps,
            files,
        };
        info!(
            "channel {}: wrote {} ({} frames, {:.1}s, {:.2} fps)",
            clip.channel,
            stem,
            clip.frame_count,
            clip.duration_secs,
            clip.fps
        );
        Ok(Some(clip))
    }

    /// Drop the buffer and forget the resolution
    pub fn reset(&mut self) {
        debug!("channel {}: writer reset ({} frames dropped)", self.channel, self.frames.len());
        self.frames.clear();
        self.resolution = None;
        self.first_at = None;
        self.last_at = None;
    }

    fn uniform_frames(&self, width: u32, height: u32) -> Vec<RgbImage> {
        self.frames
            .iter()
            .map(|frame| {
                if frame.dimensions() == (width, height) {
                    frame.clone()
                } else {
                    imageops::resize(frame, width, height, FilterType::Triangle)
                }
            })
            .collect()
    }
}

/// Map a monotonic timestamp onto local wall time, truncated to seconds
fn wall_time_of(at: Instant) -> DateTime<Local> {
    let age = chrono::Duration::from_std(at.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
    let wall = Local::now() - age;
    wall.with_nanosecond(0).unwrap_or(wall)
}
