// THEORY:
// The `Frame` module wraps one captured camera image and the time it was taken.
// It is owned transiently by the pipeline: nothing keeps a frame beyond the call
// that processes it, only the scalar sample derived from it.
//
// Its core operation is `region_mean_intensity`, the spatial pooling step of the
// whole method. Averaging every channel of every pixel in the forehead region
// collapses sensor noise into a single number per frame; the tiny periodic
// brightening and darkening of that number is the pulse we are looking for.

use crate::core_modules::bounding_box::BoundingBox;
use image::{GrayImage, RgbImage};

/// A captured RGB image plus its monotonic capture timestamp in seconds.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: f64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: f64) -> Self {
        Self { image, timestamp }
    }

    /// Builds a frame from a tightly packed RGB8 buffer. Returns `None` if the
    /// buffer length does not match `width * height * 3`.
    pub fn from_rgb_bytes(width: u32, height: u32, bytes: Vec<u8>, timestamp: f64) -> Option<Self> {
        RgbImage::from_raw(width, height, bytes).map(|image| Self { image, timestamp })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn grayscale(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Grayscale with a global histogram equalisation, the usual input for a
    /// cascade-style face detector.
    pub fn equalized_grayscale(&self) -> GrayImage {
        imageproc::contrast::equalize_histogram(&self.grayscale())
    }

    /// Mean of `(r + g + b) / 3` over every pixel of `roi` that lies inside the frame.
    /// Returns `None` when the region does not overlap the frame at all.
    pub fn region_mean_intensity(&self, roi: &BoundingBox) -> Option<f64> {
        let visible = roi.clip_to(self.width(), self.height())?;

        let mut sum_r = 0u64;
        let mut sum_g = 0u64;
        let mut sum_b = 0u64;

        for y in visible.y as u32..visible.y as u32 + visible.height {
            for x in visible.x as u32..visible.x as u32 + visible.width {
                let [r, g, b] = self.image.get_pixel(x, y).0;
                sum_r += r as u64;
                sum_g += g as u64;
                sum_b += b as u64;
            }
        }

        let num_pixels = visible.area() as f64;
        let mean_r = sum_r as f64 / num_pixels;
        let mean_g = sum_g as f64 / num_pixels;
        let mean_b = sum_b as f64 / num_pixels;
        Some((mean_r + mean_g + mean_b) / 3.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> Frame {
        Frame::new(RgbImage::from_pixel(width, height, Rgb(color)), 0.0)
    }

    #[test]
    fn mean_intensity_averages_all_channels() {
        let frame = solid(20, 20, [30, 60, 90]);
        let roi = BoundingBox::new(5, 5, 4, 4).unwrap();
        assert_eq!(frame.region_mean_intensity(&roi), Some(60.0));
    }

    #[test]
    fn mean_intensity_only_counts_the_region() {
        let mut frame = solid(10, 10, [0, 0, 0]);
        for y in 0..5 {
            for x in 0..5 {
                frame.image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let bright = BoundingBox::new(0, 0, 5, 5).unwrap();
        let half = BoundingBox::new(0, 0, 10, 5).unwrap();
        assert_eq!(frame.region_mean_intensity(&bright), Some(255.0));
        assert_eq!(frame.region_mean_intensity(&half), Some(127.5));
    }

    #[test]
    fn region_partly_outside_is_clipped() {
        let frame = solid(10, 10, [90, 90, 90]);
        let roi = BoundingBox::new(8, 8, 10, 10).unwrap();
        assert_eq!(frame.region_mean_intensity(&roi), Some(90.0));
    }

    #[test]
    fn region_outside_frame_has_no_intensity() {
        let frame = solid(10, 10, [90, 90, 90]);
        let roi = BoundingBox::new(50, 50, 5, 5).unwrap();
        assert_eq!(frame.region_mean_intensity(&roi), None);
    }

    #[test]
    fn raw_buffer_must_match_dimensions() {
        assert!(Frame::from_rgb_bytes(2, 2, vec![0; 12], 1.0).is_some());
        assert!(Frame::from_rgb_bytes(2, 2, vec![0; 11], 1.0).is_none());
    }

    #[test]
    fn grayscale_keeps_dimensions() {
        let frame = solid(7, 3, [10, 200, 40]);
        let gray = frame.equalized_grayscale();
        assert_eq!(gray.dimensions(), (7, 3));
    }
}
