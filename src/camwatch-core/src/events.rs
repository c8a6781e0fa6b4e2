//! Events published by channel pipelines

use chrono::{DateTime, Local};

use camwatch_processing::FinalizedClip;

/// Capacity of the broadcast buffer; slow subscribers lag past this
pub const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A channel went from idle to recording
    MotionDetected {
        channel: String,
        at: DateTime<Local>,
    },
    /// A recording was written to disk
    ClipFinalized(FinalizedClip),
    /// A recording was dropped (false alarm or shutdown)
    ClipDiscarded { channel: String },
}

impl PipelineEvent {
    pub fn channel(&self) -> &str {
        match self {
            PipelineEvent::MotionDetected { channel, .. } => channel,
            PipelineEvent::ClipFinalized(clip) => &clip.channel,
            PipelineEvent::ClipDiscarded { channel } => channel,
        }
    }
}
