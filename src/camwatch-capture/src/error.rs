//! Capture error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid channel name: {0}")]
    InvalidChannel(String),

    #[error("camera source is empty: {0}")]
    EmptySource(String),

    #[error("camera closed")]
    Closed,
}
