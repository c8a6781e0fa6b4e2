//! Frame decoding and pixel-level motion primitives

use std::time::Instant;

use image::{GrayImage, Luma, RgbImage};

use crate::error::ProcessingError;

/// Mask value for foreground pixels
pub const FOREGROUND: u8 = 255;

/// A decoded frame: colour image for the writer, blurred greyscale for the
/// detector.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub color: RgbImage,
    pub grey: GrayImage,
    pub timestamp: Instant,
}

impl DecodedFrame {
    pub fn dimensions(&self) -> (u32, u32) {
        self.color.dimensions()
    }
}

/// Decode encoded image bytes into colour and blurred greyscale images
pub fn decode_frame(
    data: &[u8],
    blur_sigma: f32,
    timestamp: Instant,
) -> Result<DecodedFrame, ProcessingError> {
    let img = image::load_from_memory(data)?;
    let color = img.to_rgb8();
    let grey = img.to_luma8();
    let grey = if blur_sigma > 0.0 {
        image::imageops::blur(&grey, blur_sigma)
    } else {
        grey
    };

    Ok(DecodedFrame {
        color,
        grey,
        timestamp,
    })
}

/// Absolute difference of two greyscale frames, thresholded to a binary mask.
///
/// Returns `None` when the frames differ in size.
pub fn difference_mask(prev: &GrayImage, curr: &GrayImage, threshold: u8) -> Option<GrayImage> {
    if prev.dimensions() != curr.dimensions() {
        return None;
    }

    let (width, height) = curr.dimensions();
    let mut mask = GrayImage::new(width, height);
    for ((out, a), b) in mask.pixels_mut().zip(prev.pixels()).zip(curr.pixels()) {
        let delta = a.0[0].abs_diff(b.0[0]);
        *out = Luma([if delta > threshold { FOREGROUND } else { 0 }]);
    }
    Some(mask)
}

/// Dilate a binary mask with a 3x3 square kernel applied `iterations` times.
///
/// Repeated 3x3 dilation equals one pass with a (2k+1) square, done here as
/// two separable max passes.
pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
    if iterations == 0 {
        return mask.clone();
    }

    let (width, height) = mask.dimensions();
    let radius = iterations as i64;

    let mut horizontal = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let lo = (x as i64 - radius).max(0) as u32;
            let hi = (x as i64 + radius).min(width as i64 - 1) as u32;
            let hit = (lo..=hi).any(|xx| mask.get_pixel(xx, y).0[0] > 0);
            if hit {
                horizontal.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let lo = (y as i64 - radius).max(0) as u32;
        let hi = (y as i64 + radius).min(height as i64 - 1) as u32;
        for x in 0..width {
            let hit = (lo..=hi).any(|yy| horizontal.get_pixel(x, yy).0[0] > 0);
            if hit {
                out.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn count_foreground(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p.0[0] > 0).count()
    }

    #[test]
    fn test_decode_png_roundtrip_dimensions() {
        let img = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let frame = decode_frame(&bytes, 3.5, Instant::now()).unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(frame.grey.dimensions(), (32, 24));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode_frame(b"definitely not an image", 3.5, Instant::now()).unwrap_err();
        assert!(matches!(err, ProcessingError::Decode(_)));
    }

    #[test]
    fn test_difference_mask_thresholds() {
        let prev = GrayImage::from_pixel(4, 1, Luma([100]));
        let mut curr = prev.clone();
        curr.put_pixel(0, 0, Luma([125])); // exactly threshold: not motion
        curr.put_pixel(1, 0, Luma([126]));
        curr.put_pixel(2, 0, Luma([10]));

        let mask = difference_mask(&prev, &curr, 25).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 0).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(2, 0).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(3, 0).0[0], 0);
    }

    #[test]
    fn test_difference_mask_size_mismatch() {
        let a = GrayImage::new(4, 4);
        let b = GrayImage::new(4, 5);
        assert!(difference_mask(&a, &b, 25).is_none());
    }

    #[test]
    fn test_dilate_grows_single_pixel() {
        let mut mask = GrayImage::new(11, 11);
        mask.put_pixel(5, 5, Luma([FOREGROUND]));

        assert_eq!(count_foreground(&dilate(&mask, 1)), 9);
        assert_eq!(count_foreground(&dilate(&mask, 2)), 25);
        assert_eq!(count_foreground(&dilate(&mask, 0)), 1);
    }

    #[test]
    fn test_dilate_clips_at_border() {
        let mut mask = GrayImage::new(5, 5);
        mask.put_pixel(0, 0, Luma([FOREGROUND]));
        assert_eq!(count_foreground(&dilate(&mask, 2)), 9);
    }
}
