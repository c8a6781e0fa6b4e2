//! Motion detection between consecutive greyscale frames
//!
//! Pipeline per frame pair: absolute difference, binary threshold,
//! dilation, external contours, then the largest contour's area is compared
//! against the configured area threshold.
//!
//! While a recording is active the centroid of the largest contour is
//! tracked in a [`MotionState`]. A recording only counts as real motion once
//! two tracked centroids lie further apart than the cumulative motion
//! threshold; until then it is presumed a false alarm (sensor noise,
//! lighting flicker confined to one spot).

use std::time::Instant;

use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::contour::{find_external_contours, largest_contour};
use crate::error::ProcessingError;
use crate::vision::{decode_frame, difference_mask, dilate, DecodedFrame};

/// Detection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum largest-contour area that counts as motion (px^2)
    pub motion_area_threshold: f64,
    /// Centroid spread that marks a recording as real motion (px)
    pub cumulative_motion_threshold: f64,
    /// Per-pixel difference needed to enter the motion mask
    pub pixel_threshold: u8,
    /// Gaussian sigma applied to greyscale frames (3.5 ~ 21x21 kernel)
    pub blur_sigma: f32,
    /// 3x3 dilation passes over the motion mask
    pub dilate_iterations: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            motion_area_threshold: 2500.0,
            cumulative_motion_threshold: 50.0,
            pixel_threshold: 25,
            blur_sigma: 3.5,
            dilate_iterations: 2,
        }
    }
}

/// Result of comparing two frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub motion: bool,
    /// Area of the largest contour (0 when none)
    pub largest_area: f64,
    /// Centroid of the largest contour when motion was detected and the
    /// contour is not degenerate
    pub centroid: Option<(i32, i32)>,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            motion: false,
            largest_area: 0.0,
            centroid: None,
        }
    }
}

pub struct MotionDetector {
    config: DetectorConfig,
}

impl MotionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Decode an encoded frame with this detector's blur setting
    pub fn decode(&self, data: &[u8], timestamp: Instant) -> Result<DecodedFrame, ProcessingError> {
        decode_frame(data, self.config.blur_sigma, timestamp)
    }

    /// Compare two blurred greyscale frames. Without a previous frame there
    /// is never motion.
    pub fn detect(&self, prev: Option<&GrayImage>, curr: &GrayImage) -> Detection {
        let Some(prev) = prev else {
            return Detection::none();
        };

        let Some(mask) = difference_mask(prev, curr, self.config.pixel_threshold) else {
            debug!(
                "frame size changed ({:?} -> {:?}), skipping comparison",
                prev.dimensions(),
                curr.dimensions()
            );
            return Detection::none();
        };
        let mask = dilate(&mask, self.config.dilate_iterations);

        let contours = find_external_contours(&mask);
        let Some((largest, area)) = largest_contour(&contours) else {
            return Detection::none();
        };

        let motion = area > self.config.motion_area_threshold;
        trace!("{} contours, largest area {:.0}, motion={}", contours.len(), area, motion);

        Detection {
            motion,
            largest_area: area,
            centroid: if motion { largest.centroid() } else { None },
        }
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

/// Per-recording tracking state, built fresh for every recording attempt
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    centroids: Vec<(i32, i32)>,
    false_alarm: bool,
    motionless_frames: u32,
}

impl MotionState {
    pub fn new() -> Self {
        Self {
            centroids: Vec::new(),
            false_alarm: true,
            motionless_frames: 0,
        }
    }

    /// Fold one detection into the state.
    ///
    /// The false-alarm flag only ever goes from true to false.
    pub fn track(mut self, detection: &Detection, spread_threshold: f64) -> Self {
        if !detection.motion {
            self.motionless_frames += 1;
            return self;
        }
        self.motionless_frames = 0;

        if !self.false_alarm {
            return self;
        }
        let Some(point) = detection.centroid else {
            return self;
        };

        // Earlier pairs were already checked when their later point arrived
        let spread = self
            .centroids
            .iter()
            .any(|&other| distance(other, point) > spread_threshold);
        self.centroids.push(point);
        if spread {
            debug!("centroid spread exceeded {} px, motion confirmed", spread_threshold);
            self.false_alarm = false;
        }
        self
    }

    pub fn is_false_alarm(&self) -> bool {
        self.false_alarm
    }

    pub fn centroids(&self) -> &[(i32, i32)] {
        &self.centroids
    }

    pub fn motionless_frames(&self) -> u32 {
        self.motionless_frames
    }
}

impl Default for MotionState {
    fn default() -> Self {
        Self::new()
    }
}

fn distance(a: (i32, i32), b: (i32, i32)) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    dx.hypot(dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const W: u32 = 320;
    const H: u32 = 240;

    fn background() -> GrayImage {
        GrayImage::from_pixel(W, H, Luma([40]))
    }

    fn with_block(x0: u32, y0: u32, size: u32) -> GrayImage {
        let mut img = background();
        for y in y0..(y0 + size).min(H) {
            for x in x0..(x0 + size).min(W) {
                img.put_pixel(x, y, Luma([220]));
            }
        }
        img
    }

    fn motion_at(x: i32, y: i32) -> Detection {
        Detection {
            motion: true,
            largest_area: 5000.0,
            centroid: Some((x, y)),
        }
    }

    #[test]
    fn test_first_frame_never_motion() {
        let detector = MotionDetector::default();
        let d = detector.detect(None, &with_block(10, 10, 100));
        assert!(!d.motion);
        assert_eq!(d.centroid, None);
    }

    #[test]
    fn test_identical_frames_no_motion() {
        let detector = MotionDetector::default();
        let frame = with_block(50, 50, 80);
        let d = detector.detect(Some(&frame), &frame);
        assert!(!d.motion);
        assert_eq!(d.largest_area, 0.0);
    }

    #[test]
    fn test_large_block_is_motion() {
        let detector = MotionDetector::default();
        let d = detector.detect(Some(&background()), &with_block(100, 60, 80));
        assert!(d.motion);
        // 80px block dilated by 2 on each side: traced border spans 83px
        assert_eq!(d.largest_area, 83.0 * 83.0);
        assert_eq!(d.centroid, Some((139, 99)));
    }

    #[test]
    fn test_small_block_below_area_threshold() {
        let detector = MotionDetector::default();
        let d = detector.detect(Some(&background()), &with_block(100, 60, 20));
        assert!(!d.motion);
        assert!(d.largest_area > 0.0);
        assert_eq!(d.centroid, None);
    }

    #[test]
    fn test_size_change_is_not_motion() {
        let detector = MotionDetector::default();
        let small = GrayImage::new(10, 10);
        assert!(!detector.detect(Some(&small), &background()).motion);
    }

    #[test]
    fn test_state_stays_false_alarm_without_spread() {
        let mut state = MotionState::new();
        for i in 0..50 {
            state = state.track(&motion_at(100 + (i % 5), 100), 50.0);
        }
        assert!(state.is_false_alarm());
        assert_eq!(state.centroids().len(), 50);
    }

    #[test]
    fn test_state_spread_clears_false_alarm_permanently() {
        let state = MotionState::new()
            .track(&motion_at(10, 10), 50.0)
            .track(&motion_at(40, 40), 50.0);
        assert!(state.is_false_alarm()); // ~42px apart

        let state = state.track(&motion_at(10, 70), 50.0);
        assert!(!state.is_false_alarm());

        let state = state
            .track(&Detection::none(), 50.0)
            .track(&motion_at(10, 10), 50.0);
        assert!(!state.is_false_alarm());
    }

    #[test]
    fn test_state_skips_degenerate_centroid() {
        let degenerate = Detection {
            motion: true,
            largest_area: 4000.0,
            centroid: None,
        };
        let state = MotionState::new().track(&degenerate, 50.0);
        assert!(state.centroids().is_empty());
        assert_eq!(state.motionless_frames(), 0);
    }

    #[test]
    fn test_state_counts_motionless_frames() {
        let mut state = MotionState::new();
        for _ in 0..3 {
            state = state.track(&Detection::none(), 50.0);
        }
        assert_eq!(state.motionless_frames(), 3);
        state = state.track(&motion_at(1, 1), 50.0);
        assert_eq!(state.motionless_frames(), 0);
    }

    #[test]
    fn test_moving_block_confirms_motion() {
        let detector = MotionDetector::default();
        let frames: Vec<GrayImage> = (0..4).map(|i| with_block(20 + i * 60, 80, 60)).collect();

        let mut state = MotionState::new();
        for pair in frames.windows(2) {
            let d = detector.detect(Some(&pair[0]), &pair[1]);
            assert!(d.motion);
            state = state.track(&d, detector.config().cumulative_motion_threshold);
        }
        assert!(!state.is_false_alarm());
    }
}
