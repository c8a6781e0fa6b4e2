//! camwatch-processing - Motion detection and clip encoding for Camwatch
//!
//! Decodes sampled frames, detects motion between consecutive greyscale
//! frames, and turns buffered recordings into video files.

pub mod contour;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod naming;
pub mod vision;
pub mod writer;

pub use detector::{Detection, DetectorConfig, MotionDetector, MotionState};
pub use encoder::{ClipEncoder, EncodeJob, FfmpegEncoder, VideoFormat};
pub use error::ProcessingError;
pub use naming::{clip_stem, parse_clip_name, strip_extension, ClipName};
pub use vision::DecodedFrame;
pub use writer::{ClipFile, FinalizedClip, VideoWriter, WriterConfig};
