//! Per-channel worker: queue, sampler, decoder and recording controller
//!
//! Each channel runs one of these on its own thread. The ingestion queue is
//! the only state shared with the outside; everything else is owned by the
//! worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::broadcast;
use tracing::{debug, info, info_span, warn};

use camwatch_capture::{AdaptiveSampler, ChannelId, FrameQueue};

use crate::controller::{ControllerStep, RecordingController};
use crate::events::PipelineEvent;

/// Counters reported when a worker stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_dequeued: u64,
    pub frames_sampled: u64,
    pub decode_errors: u64,
    pub clips_written: u64,
    pub clips_discarded: u64,
}

pub struct ChannelPipeline {
    channel: ChannelId,
    queue: Arc<FrameQueue>,
    sampler: AdaptiveSampler,
    controller: RecordingController,
    events: broadcast::Sender<PipelineEvent>,
    idle_poll: Duration,
    stats: PipelineStats,
}

impl ChannelPipeline {
    pub fn new(
        channel: ChannelId,
        queue: Arc<FrameQueue>,
        sampler: AdaptiveSampler,
        controller: RecordingController,
        events: broadcast::Sender<PipelineEvent>,
        idle_poll: Duration,
    ) -> Self {
        Self {
            channel,
            queue,
            sampler,
            controller,
            events,
            idle_poll,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Take at most one frame off the queue and process it.
    ///
    /// Returns false when the queue was empty.
    pub fn step(&mut self) -> bool {
        self.sampler.adjust(self.queue.len());

        let Some(frame) = self.queue.pop() else {
            return false;
        };
        self.stats.frames_dequeued += 1;

        // Skipped frames are consumed so the backlog actually drains
        if !self.sampler.tick() {
            return true;
        }
        self.stats.frames_sampled += 1;

        let decoded = match self.controller.decode(&frame.data, frame.arrived_at) {
            Ok(d) => d,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("skipping undecodable frame: {}", e);
                return true;
            }
        };

        match self.controller.process(decoded) {
            Ok(step) => self.publish(step),
            Err(e) => warn!("recording failed: {}", e),
        }
        true
    }

    fn publish(&mut self, step: ControllerStep) {
        let event = match step {
            ControllerStep::Started { .. } => PipelineEvent::MotionDetected {
                channel: self.channel.to_string(),
                at: Local::now(),
            },
            ControllerStep::Finalized(clip) => {
                self.stats.clips_written += 1;
                PipelineEvent::ClipFinalized(clip)
            }
            ControllerStep::Discarded => {
                self.stats.clips_discarded += 1;
                PipelineEvent::ClipDiscarded {
                    channel: self.channel.to_string(),
                }
            }
            ControllerStep::Idle | ControllerStep::Recording | ControllerStep::NoClip => return,
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Process frames until `running` is cleared, then discard any
    /// recording in progress.
    pub fn run(mut self, running: Arc<AtomicBool>) -> PipelineStats {
        let span = info_span!("channel", name = %self.channel);
        let _enter = span.enter();
        info!("channel worker started");

        while running.load(Ordering::SeqCst) {
            if !self.step() {
                std::thread::sleep(self.idle_poll);
            }
        }

        if self.controller.shutdown() {
            self.stats.clips_discarded += 1;
            let _ = self.events.send(PipelineEvent::ClipDiscarded {
                channel: self.channel.to_string(),
            });
        }
        let left = self.queue.clear();
        if left > 0 {
            debug!("dropped {} queued frames on shutdown", left);
        }

        info!(
            "channel worker stopped: {} dequeued, {} sampled, {} clips, {} discarded, {} queue drops",
            self.stats.frames_dequeued,
            self.stats.frames_sampled,
            self.stats.clips_written,
            self.stats.clips_discarded,
            self.queue.dropped()
        );
        self.stats
    }
}
