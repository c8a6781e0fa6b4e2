//! Clip encoding using FFmpeg
//!
//! Raw RGB frames are piped straight to FFmpeg stdin; nothing is staged on
//! disk besides the output file.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProcessingError;

/// Output container/codec pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    /// VP9 in WebM
    Webm,
    /// H.264 in MP4
    Mp4,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 2] = [VideoFormat::Webm, VideoFormat::Mp4];

    pub fn extension(&self) -> &'static str {
        match self {
            VideoFormat::Webm => "webm",
            VideoFormat::Mp4 => "mp4",
        }
    }

    /// Case-insensitive lookup by file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Parameters for encoding one clip file
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub output: PathBuf,
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// CRF value, lower is better
    pub quality: u32,
}

/// Turns a sequence of equally sized frames into a video file
pub trait ClipEncoder: Send + Sync {
    fn encode(&self, job: &EncodeJob, frames: &[RgbImage]) -> Result<(), ProcessingError>;
}

const EVEN_SCALE: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";

/// Encoder backed by the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, job: &EncodeJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", job.width, job.height))
            .arg("-r")
            .arg(format!("{:.6}", job.fps))
            .args(["-i", "-"]);

        match job.format {
            VideoFormat::Webm => {
                cmd.args(["-c:v", "libvpx-vp9"])
                    .arg("-crf")
                    .arg(job.quality.to_string())
                    .args(["-b:v", "0"]);
            }
            VideoFormat::Mp4 => {
                cmd.args(["-c:v", "libx264"])
                    .arg("-crf")
                    .arg(job.quality.to_string())
                    .args(["-preset", "fast"]);
            }
        }

        // yuv420p needs even dimensions; trim an odd row or column
        if job.width % 2 != 0 || job.height % 2 != 0 {
            cmd.args(["-vf", EVEN_SCALE]);
        }
        cmd.args(["-pix_fmt", "yuv420p"])
            .arg(&job.output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn encode(&self, job: &EncodeJob, frames: &[RgbImage]) -> Result<(), ProcessingError> {
        if frames.is_empty() {
            return Err(ProcessingError::NoFrames);
        }

        let mut cmd = self.command(job);
        debug!("spawning ffmpeg: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessingError::FfmpegNotFound
            } else {
                ProcessingError::Io(e)
            }
        })?;

        let mut write_result = Ok(());
        if let Some(mut stdin) = child.stdin.take() {
            for frame in frames {
                if let Err(e) = stdin.write_all(frame.as_raw()) {
                    write_result = Err(e);
                    break;
                }
            }
            // stdin dropped here: EOF for ffmpeg
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::Encode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.chars().take(500).collect::<String>()
            )));
        }
        if let Err(e) = write_result {
            warn!("ffmpeg accepted partial input for {:?}: {}", job.output, e);
            return Err(ProcessingError::Io(e));
        }

        info!(
            "encoded {} frames to {:?} ({}x{} @ {:.2} fps)",
            frames.len(),
            job.output,
            job.width,
            job.height,
            job.fps
        );
        Ok(())
    }
}

/// Check if FFmpeg is available
pub fn check_ffmpeg() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
