// THEORY:
// The `roi_tracker` module gives the engine "object permanence" for a single face.
// A face detector run on every frame is both expensive and noisy: the boxes it
// returns wobble by a few pixels even when the subject sits perfectly still, and
// every wobble would move the forehead region and inject a step into the intensity
// signal. The tracker turns that noisy stream into one stable rectangle.
//
// Key architectural principles:
// 1.  **Single Track**: Only one face matters. Out of all candidates the largest one
//     is taken as the subject (the closest person to the camera).
// 2.  **Jitter Suppression**: A newly detected face only replaces the held one when
//     its centre moved further than a threshold from the last accepted centre.
//     Small detector noise is therefore absorbed instead of followed.
// 3.  **Search vs Lock**: In search mode candidates are evaluated every frame. In
//     lock mode the held face, and the forehead derived from it, are frozen for the
//     duration of a measurement and no candidate is looked at.
// 4.  **Value Semantics**: The held face is a `BoundingBox` value replaced
//     wholesale; until a face is accepted it is the `BoundingBox::SENTINEL`.

use crate::config::ForeheadProportions;
use crate::core_modules::bounding_box::BoundingBox;
use tracing::debug;

/// The face currently held by the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedFace {
    /// The locked face rectangle, or the sentinel while nothing has been accepted.
    pub face_box: BoundingBox,
    /// Centre of the last accepted detection, compared against new candidates.
    pub last_center: (f64, f64),
}

impl Default for TrackedFace {
    fn default() -> Self {
        Self {
            face_box: BoundingBox::SENTINEL,
            last_center: (0.0, 0.0),
        }
    }
}

/// Holds a stable face rectangle and derives the forehead region from it.
#[derive(Debug, Clone)]
pub struct RoiTracker {
    tracked: TrackedFace,
    locked: bool,
    jitter_threshold: f64,
    proportions: ForeheadProportions,
}

impl RoiTracker {
    pub fn new(jitter_threshold: f64, proportions: ForeheadProportions) -> Self {
        Self {
            tracked: TrackedFace::default(),
            locked: false,
            jitter_threshold,
            proportions,
        }
    }

    /// Evaluates this frame's candidates (search mode only) and returns the held face.
    pub fn detect_or_hold(&mut self, candidates: &[BoundingBox]) -> BoundingBox {
        if self.locked {
            return self.tracked.face_box;
        }

        // `max_by_key` keeps the last of several equally large boxes.
        let Some(largest) = candidates
            .iter()
            .filter(|candidate| !candidate.is_degenerate())
            .max_by_key(|candidate| candidate.area())
        else {
            return self.tracked.face_box;
        };

        let shift = largest.center_distance(self.tracked.last_center);
        if shift > self.jitter_threshold {
            debug!(?largest, shift, "accepted new face candidate");
            self.tracked = TrackedFace {
                face_box: *largest,
                last_center: largest.center(),
            };
        }
        self.tracked.face_box
    }

    /// The forehead sub-rectangle of `face`. Pure function of its input.
    pub fn forehead_roi(&self, face: &BoundingBox) -> BoundingBox {
        forehead_roi(face, &self.proportions)
    }

    /// The forehead of the currently held face.
    pub fn current_forehead(&self) -> BoundingBox {
        self.forehead_roi(&self.tracked.face_box)
    }

    pub fn current_face(&self) -> BoundingBox {
        self.tracked.face_box
    }

    pub fn tracked(&self) -> &TrackedFace {
        &self.tracked
    }

    /// Flips between search and lock mode and returns `true` when now locked.
    pub fn toggle_lock(&mut self) -> bool {
        self.set_locked(!self.locked);
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        if self.locked != locked {
            debug!(locked, face = ?self.tracked.face_box, "face lock changed");
        }
        self.locked = locked;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// `false` while the held face is still the sentinel; no forehead is meaningful then.
    pub fn has_face(&self) -> bool {
        !self.tracked.face_box.is_sentinel()
    }

    /// Forgets the held face and returns to search mode.
    pub fn reset(&mut self) {
        self.tracked = TrackedFace::default();
        self.locked = false;
    }
}

/// Places the forehead inside `face` using fractional offsets of its size.
pub fn forehead_roi(face: &BoundingBox, proportions: &ForeheadProportions) -> BoundingBox {
    let fw = face.width as f64;
    let fh = face.height as f64;
    let x = face.x as f64 + fw * proportions.center_x - fw * proportions.width / 2.0;
    let y = face.y as f64 + fh * proportions.center_y - fh * proportions.height / 2.0;
    BoundingBox {
        x: x as i32,
        y: y as i32,
        width: ((fw * proportions.width) as u32).max(1),
        height: ((fh * proportions.height) as u32).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracker() -> RoiTracker {
        RoiTracker::new(10.0, ForeheadProportions::default())
    }

    fn bbox(x: i32, y: i32, w: u32, h: u32) -> BoundingBox {
        BoundingBox::new(x, y, w, h).unwrap()
    }

    #[test]
    fn no_candidates_keeps_the_sentinel() {
        let mut t = tracker();
        assert_eq!(t.detect_or_hold(&[]), BoundingBox::SENTINEL);
        assert!(!t.has_face());
    }

    #[test]
    fn largest_candidate_wins() {
        let mut t = tracker();
        let small = bbox(0, 0, 50, 50);
        let large = bbox(200, 100, 120, 120);
        let medium = bbox(400, 100, 80, 80);
        assert_eq!(t.detect_or_hold(&[small, large, medium]), large);
        assert!(t.has_face());
    }

    #[test]
    fn equal_areas_resolve_to_the_last_examined() {
        let mut t = tracker();
        let first = bbox(100, 100, 60, 60);
        let second = bbox(300, 300, 60, 60);
        assert_eq!(t.detect_or_hold(&[first, second]), second);
    }

    #[test]
    fn small_moves_are_suppressed() {
        let mut t = tracker();
        let face = bbox(100, 100, 100, 100);
        t.detect_or_hold(&[face]);

        let nudged = bbox(106, 106, 100, 100); // centre moves ~8.5 px
        assert_eq!(t.detect_or_hold(&[nudged]), face);

        let moved = bbox(120, 100, 100, 100);
        assert_eq!(t.detect_or_hold(&[moved]), moved);
        assert_eq!(t.tracked().last_center, (170.0, 150.0));
    }

    #[test]
    fn lock_freezes_the_face() {
        let mut t = tracker();
        let face = bbox(100, 100, 100, 100);
        t.detect_or_hold(&[face]);
        assert!(t.toggle_lock());

        let elsewhere = bbox(400, 300, 150, 150);
        assert_eq!(t.detect_or_hold(&[elsewhere]), face);

        assert!(!t.toggle_lock());
        assert_eq!(t.detect_or_hold(&[elsewhere]), elsewhere);
    }

    #[test]
    fn forehead_uses_fixed_proportions() {
        let t = tracker();
        let face = bbox(100, 200, 200, 100);
        // x = 100 + 100 - 25, y = 200 + 18 - 7.5
        assert_eq!(t.forehead_roi(&face), bbox(175, 210, 50, 15));
    }

    #[test]
    fn forehead_of_a_tiny_face_is_never_empty() {
        let roi = forehead_roi(&BoundingBox::SENTINEL, &ForeheadProportions::default());
        assert!(!roi.is_degenerate());
    }

    #[test]
    fn reset_returns_to_search_with_sentinel() {
        let mut t = tracker();
        t.detect_or_hold(&[bbox(10, 10, 80, 80)]);
        t.set_locked(true);
        t.reset();
        assert!(!t.is_locked());
        assert_eq!(t.current_face(), BoundingBox::SENTINEL);
        assert_eq!(t.tracked().last_center, (0.0, 0.0));
    }

    fn candidate() -> impl Strategy<Value = BoundingBox> {
        (0i32..640, 0i32..480, 1u32..200, 1u32..200)
            .prop_map(|(x, y, w, h)| BoundingBox { x, y, width: w, height: h })
    }

    proptest! {
        #[test]
        fn held_face_only_changes_on_large_moves(
            frames in prop::collection::vec(prop::collection::vec(candidate(), 0..4), 1..40)
        ) {
            let mut t = tracker();
            let mut held = BoundingBox::SENTINEL;
            let mut last_center = (0.0, 0.0);

            for candidates in frames {
                let result = t.detect_or_hold(&candidates);
                if result != held {
                    prop_assert!(result.center_distance(last_center) > 10.0);
                    last_center = result.center();
                    held = result;
                }
                prop_assert_eq!(t.current_face(), held);
            }
        }
    }
}
