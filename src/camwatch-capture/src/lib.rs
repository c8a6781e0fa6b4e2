//! camwatch-capture - Frame ingestion for Camwatch
//!
//! Provides the per-channel ingestion queue, the load-adaptive sampler
//! and the camera capability trait used by capture backends.

pub mod camera;
pub mod error;
pub mod frame;
pub mod queue;
pub mod sampler;

pub use camera::{run_capture, Camera, DirectoryCamera};
pub use error::CaptureError;
pub use frame::{ChannelId, Frame, FILENAME_DELIM};
pub use queue::{FrameQueue, DEFAULT_QUEUE_CAPACITY};
pub use sampler::{AdaptiveSampler, SamplerConfig};
