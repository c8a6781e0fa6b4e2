//! Recording state machine for one channel
//!
//! Idle: consecutive sampled frames are compared; the first pair showing
//! motion seeds the writer with both frames and starts a recording.
//! Recording: every sampled frame is buffered and compared with its
//! predecessor while centroids are tracked. The recording ends when it runs
//! longer than the clip limit or after too many motionless frames in a row.
//! It is then written out, or dropped if it never moved far enough to rule
//! out a false alarm.

use std::time::Instant;

use tracing::{debug, error, info};

use camwatch_processing::{
    DecodedFrame, FinalizedClip, MotionDetector, MotionState, ProcessingError, VideoWriter,
};

/// When a recording ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingLimits {
    /// Span between first and last frame after which the clip is closed
    pub max_clip_secs: f64,
    /// Consecutive motionless frames that close the clip
    pub motionless_frame_cap: u32,
}

impl Default for RecordingLimits {
    fn default() -> Self {
        Self {
            max_clip_secs: 60.0,
            motionless_frame_cap: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Recording,
}

/// What a single frame did to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerStep {
    /// No recording in progress
    Idle,
    /// Motion seen while idle; a recording began with the frame pair
    /// captured at `at`
    Started { at: Instant },
    /// Frame appended to the running recording
    Recording,
    /// Recording closed and written
    Finalized(FinalizedClip),
    /// Recording closed as a false alarm, nothing written
    Discarded,
    /// Recording closed but its frames spanned no time
    NoClip,
}

pub struct RecordingController {
    channel: String,
    detector: MotionDetector,
    writer: VideoWriter,
    limits: RecordingLimits,
    state: ControllerState,
    motion: MotionState,
    previous: Option<DecodedFrame>,
}

impl RecordingController {
    pub fn new(
        channel: impl Into<String>,
        detector: MotionDetector,
        writer: VideoWriter,
        limits: RecordingLimits,
    ) -> Self {
        Self {
            channel: channel.into(),
            detector,
            writer,
            limits,
            state: ControllerState::Idle,
            motion: MotionState::new(),
            previous: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn motion(&self) -> &MotionState {
        &self.motion
    }

    /// Decode an encoded frame with the detector's settings
    pub fn decode(&self, data: &[u8], timestamp: Instant) -> Result<DecodedFrame, ProcessingError> {
        self.detector.decode(data, timestamp)
    }

    /// Feed one sampled frame.
    ///
    /// A write failure still returns the controller to idle before the error
    /// is reported.
    pub fn process(&mut self, frame: DecodedFrame) -> Result<ControllerStep, ProcessingError> {
        match self.state {
            ControllerState::Idle => Ok(self.process_idle(frame)),
            ControllerState::Recording => self.process_recording(frame),
        }
    }

    fn process_idle(&mut self, frame: DecodedFrame) -> ControllerStep {
        let detection = self
            .detector
            .detect(self.previous.as_ref().map(|p| &p.grey), &frame.grey);

        if !detection.motion {
            self.previous = Some(frame);
            return ControllerStep::Idle;
        }

        info!(
            "motion detected on channel {} (area {:.0}), recording",
            self.channel, detection.largest_area
        );
        self.motion = MotionState::new();
        self.writer.reset();
        if let Some(prev) = self.previous.take() {
            self.writer.add_frame(prev.color, prev.timestamp);
        }
        self.writer.add_frame(frame.color.clone(), frame.timestamp);

        let at = frame.timestamp;
        self.previous = Some(frame);
        self.state = ControllerState::Recording;
        ControllerStep::Started { at }
    }

    fn process_recording(&mut self, frame: DecodedFrame) -> Result<ControllerStep, ProcessingError> {
        self.writer.add_frame(frame.color.clone(), frame.timestamp);

        let detection = self
            .detector
            .detect(self.previous.as_ref().map(|p| &p.grey), &frame.grey);
        let threshold = self.detector.config().cumulative_motion_threshold;
        self.motion = std::mem::take(&mut self.motion).track(&detection, threshold);
        self.previous = Some(frame);

        let too_long = self
            .writer
            .elapsed_secs()
            .is_some_and(|secs| secs > self.limits.max_clip_secs);
        let gone_still = self.motion.motionless_frames() >= self.limits.motionless_frame_cap;

        if !too_long && !gone_still {
            return Ok(ControllerStep::Recording);
        }
        debug!(
            "channel {}: recording ends ({})",
            self.channel,
            if too_long { "max duration" } else { "motion stopped" }
        );
        self.finish()
    }

    fn finish(&mut self) -> Result<ControllerStep, ProcessingError> {
        let false_alarm = self.motion.is_false_alarm();
        let result = if false_alarm {
            info!(
                "channel {}: false alarm, discarding {} frames",
                self.channel,
                self.writer.frame_count()
            );
            Ok(ControllerStep::Discarded)
        } else {
            match self.writer.write() {
                Ok(Some(clip)) => Ok(ControllerStep::Finalized(clip)),
                Ok(None) => Ok(ControllerStep::NoClip),
                Err(e) => {
                    error!("channel {}: failed to write clip: {}", self.channel, e);
                    Err(e)
                }
            }
        };

        self.writer.reset();
        self.motion = MotionState::new();
        self.state = ControllerState::Idle;
        result
    }

    /// Drop any recording in progress. Returns true if one was discarded.
    pub fn shutdown(&mut self) -> bool {
        let was_recording = self.state == ControllerState::Recording;
        if was_recording {
            info!(
                "channel {}: shutting down, discarding recording of {} frames",
                self.channel,
                self.writer.frame_count()
            );
        }
        self.writer.reset();
        self.motion = MotionState::new();
        self.previous = None;
        self.state = ControllerState::Idle;
        was_recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{block_frame, FakeEncoder};
    use camwatch_processing::{DetectorConfig, VideoFormat, WriterConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn controller(dir: &std::path::Path, limits: RecordingLimits) -> (RecordingController, Arc<FakeEncoder>) {
        let encoder = Arc::new(FakeEncoder::default());
        let writer = VideoWriter::new(
            "gate",
            WriterConfig {
                output_dir: dir.to_path_buf(),
                formats: vec![VideoFormat::Webm],
                quality: 30,
            },
            encoder.clone(),
        );
        let detector = MotionDetector::new(DetectorConfig::default());
        (RecordingController::new("gate", detector, writer, limits), encoder)
    }

    fn at(t0: Instant, i: u64) -> Instant {
        t0 + Duration::from_millis(100 * i)
    }

    #[test]
    fn test_static_scene_stays_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut c, _) = controller(tmp.path(), RecordingLimits::default());
        let t0 = Instant::now();
        for i in 0..10 {
            let step = c.process(block_frame(None, at(t0, i))).unwrap();
            assert_eq!(step, ControllerStep::Idle);
        }
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_moving_object_then_stillness_finalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut c, encoder) = controller(tmp.path(), RecordingLimits::default());
        let t0 = Instant::now();

        assert_eq!(c.process(block_frame(None, at(t0, 0))).unwrap(), ControllerStep::Idle);
        assert_eq!(
            c.process(block_frame(Some(0), at(t0, 1))).unwrap(),
            ControllerStep::Started { at: at(t0, 1) }
        );
        assert_eq!(c.process(block_frame(Some(60), at(t0, 2))).unwrap(), ControllerStep::Recording);
        assert_eq!(c.process(block_frame(Some(120), at(t0, 3))).unwrap(), ControllerStep::Recording);
        assert!(!c.motion().is_false_alarm());

        let mut last = ControllerStep::Recording;
        for i in 4..24 {
            last = c.process(block_frame(Some(120), at(t0, i))).unwrap();
            if i < 23 {
                assert_eq!(last, ControllerStep::Recording, "frame {}", i);
            }
        }

        let ControllerStep::Finalized(clip) = last else {
            panic!("expected finalized clip, got {:?}", last);
        };
        assert_eq!(clip.channel, "gate");
        assert_eq!(clip.frame_count, 24);
        assert!((clip.duration_secs - 2.3).abs() < 1e-9);
        assert!((clip.fps - 24.0 / 2.3).abs() < 1e-9);
        assert_eq!(clip.files.len(), 1);
        assert!(clip.files[0].path.exists());
        assert_eq!(encoder.jobs(), 1);
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[test]
    fn test_flicker_in_place_is_discarded_at_max_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let limits = RecordingLimits {
            max_clip_secs: 1.0,
            motionless_frame_cap: 20,
        };
        let (mut c, encoder) = controller(tmp.path(), limits);
        let t0 = Instant::now();

        c.process(block_frame(None, at(t0, 0))).unwrap();
        assert!(matches!(
            c.process(block_frame(Some(100), at(t0, 1))).unwrap(),
            ControllerStep::Started { .. }
        ));

        // Elapsed from frame 0 exceeds 1.0s at frame 11
        let mut steps = Vec::new();
        for i in 2..12 {
            let block = if i % 2 == 0 { None } else { Some(100) };
            steps.push(c.process(block_frame(block, at(t0, i))).unwrap());
        }
        assert!(steps[..9].iter().all(|s| *s == ControllerStep::Recording));
        assert_eq!(steps[9], ControllerStep::Discarded);
        assert_eq!(encoder.jobs(), 0);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_motionless_cap_ends_false_alarm() {
        let tmp = tempfile::tempdir().unwrap();
        let limits = RecordingLimits {
            max_clip_secs: 60.0,
            motionless_frame_cap: 3,
        };
        let (mut c, _) = controller(tmp.path(), limits);
        let t0 = Instant::now();

        c.process(block_frame(None, at(t0, 0))).unwrap();
        c.process(block_frame(Some(100), at(t0, 1))).unwrap();
        assert_eq!(c.process(block_frame(Some(100), at(t0, 2))).unwrap(), ControllerStep::Recording);
        assert_eq!(c.process(block_frame(Some(100), at(t0, 3))).unwrap(), ControllerStep::Recording);
        assert_eq!(c.process(block_frame(Some(100), at(t0, 4))).unwrap(), ControllerStep::Discarded);

        // Fresh cycle afterwards
        assert_eq!(c.state(), ControllerState::Idle);
        assert!(c.motion().centroids().is_empty());
        assert!(matches!(
            c.process(block_frame(None, at(t0, 5))).unwrap(),
            ControllerStep::Started { .. }
        ));
    }

    /// Real motion across frames 1-3, then a still scene until the clip closes
    fn run_until_closed(c: &mut RecordingController, t0: Instant) -> (u64, ControllerStep) {
        c.process(block_frame(None, at(t0, 0))).unwrap();
        c.process(block_frame(Some(0), at(t0, 1))).unwrap();
        c.process(block_frame(Some(60), at(t0, 2))).unwrap();
        c.process(block_frame(Some(120), at(t0, 3))).unwrap();
        for i in 4..100 {
            let step = c.process(block_frame(Some(120), at(t0, i))).unwrap();
            if step != ControllerStep::Recording {
                return (i, step);
            }
        }
        panic!("recording never closed");
    }

    #[test]
    fn test_motionless_cap_reached_before_max_duration() {
        let tmp = tempfile::tempdir().unwrap();
        let limits = RecordingLimits {
            max_clip_secs: 1.0,
            motionless_frame_cap: 5,
        };
        let (mut c, _) = controller(tmp.path(), limits);

        // Fifth still frame is frame 8, at 0.8s
        let (closed_at, step) = run_until_closed(&mut c, Instant::now());
        assert_eq!(closed_at, 8);
        let ControllerStep::Finalized(clip) = step else {
            panic!("expected finalized clip, got {:?}", step);
        };
        assert_eq!(clip.frame_count, 9);
        assert!((clip.duration_secs - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_max_duration_reached_before_motionless_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let limits = RecordingLimits {
            max_clip_secs: 0.5,
            motionless_frame_cap: 5,
        };
        let (mut c, _) = controller(tmp.path(), limits);

        // Frame 6 is the first past 0.5s, with only three still frames
        let (closed_at, step) = run_until_closed(&mut c, Instant::now());
        assert_eq!(closed_at, 6);
        let ControllerStep::Finalized(clip) = step else {
            panic!("expected finalized clip, got {:?}", step);
        };
        assert_eq!(clip.frame_count, 7);
        assert!((clip.duration_secs - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_shutdown_discards_in_flight_recording() {
        let tmp = tempfile::tempdir().unwrap();
        let (mut c, encoder) = controller(tmp.path(), RecordingLimits::default());
        let t0 = Instant::now();

        c.process(block_frame(None, at(t0, 0))).unwrap();
        c.process(block_frame(Some(0), at(t0, 1))).unwrap();
        c.process(block_frame(Some(60), at(t0, 2))).unwrap();
        c.process(block_frame(Some(120), at(t0, 3))).unwrap();

        assert!(c.shutdown());
        assert!(!c.shutdown());
        assert_eq!(c.state(), ControllerState::Idle);
        assert_eq!(encoder.jobs(), 0);
    }
}
