// Frame sources and a fixed-box face detector for offline replays.

use anyhow::{Context, bail};
use image::{GrayImage, Rgb, RgbImage};
use pulse_vision::BoundingBox;
use pulse_vision::Frame;
use pulse_vision::core_modules::interfaces::{FaceDetector, FrameSource};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use tracing::warn;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Image files from a directory, in file-name order, timestamped at a fixed rate.
pub struct DirectorySource {
    paths: std::vec::IntoIter<PathBuf>,
    fps: f64,
    index: usize,
}

impl DirectorySource {
    pub fn open(dir: &Path, fps: f64) -> anyhow::Result<Self> {
        if !(fps > 0.0) {
            bail!("fps must be positive, got {fps}");
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            bail!("no image files found in {}", dir.display());
        }

        Ok(Self {
            paths: paths.into_iter(),
            fps,
            index: 0,
        })
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Option<Frame> {
        for path in self.paths.by_ref() {
            let timestamp = self.index as f64 / self.fps;
            self.index += 1;
            match image::open(&path) {
                Ok(img) => return Some(Frame::new(img.to_rgb8(), timestamp)),
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable frame"),
            }
        }
        None
    }
}

/// A still scene with one face whose skin brightness pulses at a known rate.
pub struct SyntheticSource {
    pub face: BoundingBox,
    width: u32,
    height: u32,
    bpm: f64,
    fps: f64,
    remaining: usize,
    index: usize,
}

impl SyntheticSource {
    pub const WIDTH: u32 = 320;
    pub const HEIGHT: u32 = 240;
    const BACKGROUND: [u8; 3] = [60, 60, 70];
    const SKIN: [f64; 3] = [196.0, 152.0, 132.0];
    const PULSE_AMPLITUDE: f64 = 3.0;

    pub fn new(bpm: f64, fps: f64, frames: usize) -> Self {
        Self {
            face: BoundingBox {
                x: 100,
                y: 45,
                width: 120,
                height: 150,
            },
            width: Self::WIDTH,
            height: Self::HEIGHT,
            bpm,
            fps,
            remaining: frames,
            index: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Option<Frame> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let t = self.index as f64 / self.fps;
        self.index += 1;
        let pulse = Self::PULSE_AMPLITUDE * (2.0 * PI * self.bpm / 60.0 * t).sin();
        let skin = Self::SKIN.map(|c| (c + pulse).round().clamp(0.0, 255.0) as u8);

        let face = self.face;
        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let inside = x as i32 >= face.x
                && (x as i32) < face.x + face.width as i32
                && y as i32 >= face.y
                && (y as i32) < face.y + face.height as i32;
            if inside { Rgb(skin) } else { Rgb(Self::BACKGROUND) }
        });
        Some(Frame::new(image, t))
    }
}

/// Reports the same face box on every frame.
pub struct FixedFaceDetector {
    pub face: BoundingBox,
}

impl FaceDetector for FixedFaceDetector {
    fn detect(&mut self, _gray: &GrayImage) -> Vec<BoundingBox> {
        vec![self.face]
    }
}

/// Parses `x,y,width,height`.
pub fn parse_box(value: &str) -> Result<BoundingBox, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected x,y,width,height but got `{value}`"));
    };
    let x = x.parse::<i32>().map_err(|e| format!("x: {e}"))?;
    let y = y.parse::<i32>().map_err(|e| format!("y: {e}"))?;
    let w = w.parse::<u32>().map_err(|e| format!("width: {e}"))?;
    let h = h.parse::<u32>().map_err(|e| format!("height: {e}"))?;
    BoundingBox::new(x, y, w, h).ok_or_else(|| "width and height must be positive".to_string())
}
