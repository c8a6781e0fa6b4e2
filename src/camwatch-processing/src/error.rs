//! Processing error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("not a clip filename: {0}")]
    InvalidFilename(String),

    #[error("no frames buffered")]
    NoFrames,
}
