// THEORY:
// `BoundingBox` is a "dumb" value type: an axis-aligned rectangle in pixel
// coordinates, used for both the face and the forehead region. It is `Copy` and is
// always replaced wholesale, never edited in place, so the tracker, the renderer
// and the sampler can each hold a copy without any aliasing between them.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle in pixel coordinates. `width` and `height` are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// The placeholder face held before any detection has been accepted.
    pub const SENTINEL: BoundingBox = BoundingBox {
        x: 1,
        y: 1,
        width: 2,
        height: 2,
    };

    /// Returns `None` for a degenerate (zero-sized) rectangle.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self { x, y, width, height })
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + 0.5 * self.width as f64,
            self.y as f64 + 0.5 * self.height as f64,
        )
    }

    /// Euclidean distance from this box's centre to `point`.
    pub fn center_distance(&self, point: (f64, f64)) -> f64 {
        let (cx, cy) = self.center();
        ((cx - point.0).powi(2) + (cy - point.1).powi(2)).sqrt()
    }

    /// Intersects the box with a `width` x `height` image anchored at the origin.
    /// Returns `None` when nothing of the box lies inside the image.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(BoundingBox {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}
