//! Camwatch Core Library
//!
//! Channel pipelines, the recording state machine, quota enforcement and
//! configuration.

pub mod config;
pub mod controller;
pub mod events;
pub mod hub;
pub mod library;
pub mod pipeline;
pub mod quota;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use controller::{ControllerState, ControllerStep, RecordingController, RecordingLimits};
pub use events::PipelineEvent;
pub use hub::{spawn_catalog_recorder, ChannelHub};
pub use library::VideoLibrary;
pub use pipeline::{ChannelPipeline, PipelineStats};
pub use quota::{QuotaManager, QuotaReport, QuotaTier, QuotaWarning};
