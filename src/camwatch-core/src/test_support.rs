//! Shared fixtures for pipeline tests

use std::fs;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

use camwatch_processing::{ClipEncoder, DecodedFrame, EncodeJob, ProcessingError};

pub const WIDTH: u32 = 400;
pub const HEIGHT: u32 = 120;
pub const BLOCK: u32 = 60;
const BLOCK_TOP: u32 = 30;

/// Encoder that writes a placeholder file instead of running ffmpeg
#[derive(Default)]
pub struct FakeEncoder {
    jobs: AtomicUsize,
}

impl FakeEncoder {
    pub fn jobs(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }
}

impl ClipEncoder for FakeEncoder {
    fn encode(&self, job: &EncodeJob, frames: &[RgbImage]) -> Result<(), ProcessingError> {
        fs::write(&job.output, vec![1u8; 64 * frames.len()])?;
        self.jobs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scene(block_x: Option<u32>) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([30, 30, 30]));
    if let Some(x0) = block_x {
        for y in BLOCK_TOP..BLOCK_TOP + BLOCK {
            for x in x0..(x0 + BLOCK).min(WIDTH) {
                img.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
    }
    img
}

/// Decoded frame with an optional bright block at `block_x`, unblurred
pub fn block_frame(block_x: Option<u32>, timestamp: Instant) -> DecodedFrame {
    let color = scene(block_x);
    let grey = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| Luma([color.get_pixel(x, y).0[0]]));
    DecodedFrame {
        color,
        grey,
        timestamp,
    }
}

/// PNG bytes of the same scene, as a camera would deliver it
pub fn block_png(block_x: Option<u32>) -> Vec<u8> {
    let mut bytes = Vec::new();
    scene(block_x)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encode");
    bytes
}
