use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use pulse_vision::{BoundingBox, Frame, FrameAnalysis, FrameStatus};

const FACE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const FOREHEAD_COLOR: Rgb<u8> = Rgb([100, 255, 100]);
const SPECTRUM_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const SPECTRUM_HEIGHT: f32 = 40.0;

/// Draws the face and forehead boxes, pulses the forehead with the beat, and
/// plots the in-band spectrum along the bottom edge.
pub fn annotate(frame: &Frame, analysis: &FrameAnalysis) -> RgbImage {
    let mut output = frame.image.clone();

    if analysis.fresh {
        if let Some(spectrum) = &analysis.spectrum {
            blend_forehead(&mut output, frame, &analysis.forehead_box, spectrum.blend_alpha);
            plot_spectrum(&mut output, &spectrum.magnitudes);
        }
    }

    if let Some(rect) = to_rect(&analysis.face_box) {
        draw_hollow_rect_mut(&mut output, rect, FACE_COLOR);
    }
    if !matches!(analysis.status, FrameStatus::NoFaceLocked) {
        if let Some(rect) = to_rect(&analysis.forehead_box) {
            draw_hollow_rect_mut(&mut output, rect, FOREHEAD_COLOR);
        }
    }
    output
}

/// Scales the forehead by `alpha` and lifts its green channel towards the
/// grayscale value by `1 - alpha`, so the region flickers in step with the pulse.
pub fn blend_forehead(output: &mut RgbImage, frame: &Frame, forehead: &BoundingBox, alpha: f64) {
    let Some(visible) = forehead.clip_to(output.width(), output.height()) else {
        return;
    };
    let gray = frame.grayscale();
    let beta = 1.0 - alpha;

    for y in visible.y as u32..visible.y as u32 + visible.height {
        for x in visible.x as u32..visible.x as u32 + visible.width {
            let [r, g, b] = frame.image.get_pixel(x, y).0;
            let luma = gray.get_pixel(x, y).0[0] as f64;
            let blended = [
                alpha * r as f64,
                alpha * g as f64 + beta * luma,
                alpha * b as f64,
            ];
            output.put_pixel(x, y, Rgb(blended.map(|c| c.round().clamp(0.0, 255.0) as u8)));
        }
    }
}

fn plot_spectrum(output: &mut RgbImage, magnitudes: &[f64]) {
    let peak = magnitudes.iter().cloned().fold(0.0, f64::max);
    if magnitudes.len() < 2 || peak <= 0.0 {
        return;
    }
    let width = output.width() as f32;
    let base = output.height() as f32 - 1.0;
    let step = width / (magnitudes.len() - 1) as f32;

    let points: Vec<(f32, f32)> = magnitudes
        .iter()
        .enumerate()
        .map(|(i, m)| (i as f32 * step, base - (m / peak) as f32 * SPECTRUM_HEIGHT))
        .collect();
    for pair in points.windows(2) {
        draw_line_segment_mut(output, pair[0], pair[1], SPECTRUM_COLOR);
    }
}

fn to_rect(bbox: &BoundingBox) -> Option<Rect> {
    if bbox.is_degenerate() || bbox.is_sentinel() {
        return None;
    }
    Some(Rect::at(bbox.x, bbox.y).of_size(bbox.width, bbox.height))
}
