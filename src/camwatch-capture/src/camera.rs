//! Camera capability trait and capture loop
//!
//! Concrete capture backends (USB, board cameras, replay sources) implement
//! [`Camera`]; the backend for each channel is chosen from configuration at
//! startup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::frame::{ChannelId, Frame};

/// Image source yielding encoded frames
pub trait Camera: Send {
    /// Capture one image and return its encoded bytes
    fn capture_image(&mut self) -> Result<Vec<u8>, CaptureError>;

    /// Release the underlying device
    fn close(&mut self);
}

/// Replays the encoded images of a directory in filename order
pub struct DirectoryCamera {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    repeat: bool,
    closed: bool,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

impl DirectoryCamera {
    pub fn open(dir: impl AsRef<Path>, repeat: bool) -> Result<Self, CaptureError> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();

        if files.is_empty() {
            return Err(CaptureError::EmptySource(dir.display().to_string()));
        }
        files.sort();

        debug!("directory camera {:?} with {} images", dir, files.len());

        Ok(Self {
            dir,
            files,
            position: 0,
            repeat,
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Camera for DirectoryCamera {
    fn capture_image(&mut self) -> Result<Vec<u8>, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }
        if self.position >= self.files.len() {
            if !self.repeat {
                return Err(CaptureError::Closed);
            }
            self.position = 0;
        }
        let path = &self.files[self.position];
        self.position += 1;
        Ok(fs::read(path)?)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Drive a camera until shutdown, handing each frame to `sink`.
///
/// A capture error ends this channel's capture only. Returns the number of
/// frames delivered.
pub fn run_capture<C, F>(
    camera: &mut C,
    channel: &ChannelId,
    capture_delay: Duration,
    running: Arc<AtomicBool>,
    mut sink: F,
) -> u64
where
    C: Camera + ?Sized,
    F: FnMut(Frame),
{
    info!("starting capture for channel {}", channel);
    let mut delivered = 0u64;

    while running.load(Ordering::SeqCst) {
        match camera.capture_image() {
            Ok(data) => {
                sink(Frame::new(channel.clone(), data, Instant::now()));
                delivered += 1;
            }
            Err(CaptureError::Closed) => {
                info!("camera for channel {} closed", channel);
                break;
            }
            Err(e) => {
                warn!("capture failed for channel {}: {}", channel, e);
                break;
            }
        }

        if !capture_delay.is_zero() {
            std::thread::sleep(capture_delay);
        }
    }

    camera.close();
    info!("capture stopped for channel {} ({} frames)", channel, delivered);
    delivered
}
