// THEORY:
// The engine depends on three collaborators it does not implement: something that
// delivers camera frames, something that finds face candidates in a grayscale
// image, and something that knows which stimulus is on screen. Each is a narrow
// trait so any backend (a cascade classifier, a neural detector, a prerecorded
// video, a test fixture) can be plugged in without the core knowing about it.

use crate::core_modules::bounding_box::BoundingBox;
use crate::core_modules::frame::Frame;
use image::GrayImage;

/// Supplies successive frames with monotonically increasing timestamps.
pub trait FrameSource {
    /// Returns `None` once the source is exhausted.
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Finds zero or more candidate faces in a grayscale frame.
pub trait FaceDetector {
    fn detect(&mut self, gray: &GrayImage) -> Vec<BoundingBox>;
}

impl<F> FaceDetector for F
where
    F: FnMut(&GrayImage) -> Vec<BoundingBox>,
{
    fn detect(&mut self, gray: &GrayImage) -> Vec<BoundingBox> {
        self(gray)
    }
}

/// Reports the label of the stimulus currently shown, if any.
pub trait StimulusProvider {
    fn current_label(&self) -> Option<String>;
}

/// No stimulus subsystem attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStimulus;

impl StimulusProvider for NoStimulus {
    fn current_label(&self) -> Option<String> {
        None
    }
}

/// A single label shown for the whole run.
#[derive(Debug, Clone, Default)]
pub struct FixedStimulus(pub Option<String>);

impl StimulusProvider for FixedStimulus {
    fn current_label(&self) -> Option<String> {
        self.0.clone()
    }
}
