// THEORY:
// The `spectral` module turns the forehead intensity series into a heart rate.
// Blood volume in the skin rises and falls with every beat, and the camera sees
// that as a faint periodic change in brightness. The dominant frequency of the
// series inside the physiologically plausible band is the pulse.
//
// Key architectural principles:
// 1.  **Resample First**: Webcam frames do not arrive at a perfectly fixed rate.
//     The raw samples are linearly interpolated onto an evenly spaced grid over
//     the same time span, and the effective frame rate is measured from the data
//     itself, so the FFT bin spacing is correct regardless of capture jitter.
// 2.  **Window, Then Centre**: A Hamming window tames the discontinuity at the
//     edges of the finite window; subtracting the mean afterwards removes the
//     large DC component that would otherwise dominate the lowest bins.
// 3.  **Band-Limited Peak Picking**: Only bins strictly between the band edges
//     (50 and 180 BPM by default) are candidates; the loudest one is the estimate.
// 4.  **Degrade, Never Fail**: Too few samples, a zero time span or an empty band
//     simply produce no new estimate. The previous result stays in place and the
//     reason is reported as `InsufficientData`.
// 5.  **Replace, Don't Merge**: Only the latest `SpectralResult` is kept. It is
//     overwritten as a whole every time a fresh estimate exists.

use crate::core_modules::signal_buffer::SignalBuffer;
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::f64::consts::PI;
use std::sync::Arc;
use tracing::trace;

/// The most recent spectrum and the heart rate picked from it.
/// All vectors are restricted to the heart-rate band and share one index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectralResult {
    /// Frequency of each in-band bin, in Hz.
    pub frequencies_hz: Vec<f64>,
    /// Magnitude of each in-band bin.
    pub magnitudes: Vec<f64>,
    /// Phase of each in-band bin, in radians.
    pub phase: Vec<f64>,
    /// Index of the selected peak within the vectors above.
    pub peak_index: usize,
    /// The heart-rate estimate, in beats per minute.
    pub bpm: f64,
    /// Effective sampling rate measured from the buffer, in Hz.
    pub fps: f64,
    /// Visualisation only: weight in [0.1, 1.0] derived from the phase of the peak,
    /// used to pulse an overlay in time with the detected beat.
    pub blend_alpha: f64,
}

impl SpectralResult {
    /// The in-band frequency axis expressed in beats per minute.
    pub fn bpm_axis(&self) -> Vec<f64> {
        self.frequencies_hz.iter().map(|hz| hz * 60.0).collect()
    }
}

/// Why a frame did not yield a fresh estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsufficientData {
    /// Not more than `needed` samples are buffered yet.
    TooFewSamples { have: usize, needed: usize },
    /// The first and last timestamps coincide, so no sampling rate can be derived.
    ZeroTimeSpan,
    /// No FFT bin falls inside the heart-rate band at this resolution.
    EmptyBand,
    /// Every in-band magnitude is zero.
    FlatSpectrum,
}

/// Computes heart-rate estimates from a `SignalBuffer`, keeping only the latest.
pub struct SpectralEstimator {
    /// Plan for the most recent window length; the window stops growing once the
    /// buffer is full, so this is rebuilt only while it fills up.
    plan: Option<(usize, Arc<dyn Fft<f64>>)>,
    min_samples: usize,
    band_min_bpm: f64,
    band_max_bpm: f64,
    latest: Option<SpectralResult>,
}

impl SpectralEstimator {
    pub fn new(min_samples: usize, band_min_bpm: f64, band_max_bpm: f64) -> Self {
        Self {
            plan: None,
            min_samples,
            band_min_bpm,
            band_max_bpm,
            latest: None,
        }
    }

    /// Recomputes the spectrum from the buffered signal.
    pub fn recompute(&mut self, buffer: &SignalBuffer) -> Result<&SpectralResult, InsufficientData> {
        let timestamps = buffer.timestamps();
        let intensities = buffer.intensities();
        self.estimate_from(&timestamps, &intensities)
    }

    /// Recomputes the spectrum from parallel timestamp/intensity slices, which must be
    /// in increasing timestamp order. On success the new result replaces the old one;
    /// otherwise the old one is left untouched.
    pub fn estimate_from(
        &mut self,
        timestamps: &[f64],
        intensities: &[f64],
    ) -> Result<&SpectralResult, InsufficientData> {
        let len = timestamps.len().min(intensities.len());
        if len <= self.min_samples || len < 2 {
            return Err(InsufficientData::TooFewSamples {
                have: len,
                needed: self.min_samples + 1,
            });
        }
        let timestamps = &timestamps[..len];
        let intensities = &intensities[..len];

        let span = timestamps[len - 1] - timestamps[0];
        if !(span.is_finite() && span > 0.0) {
            return Err(InsufficientData::ZeroTimeSpan);
        }
        let fps = (len - 1) as f64 / span;

        // Even resampling, Hamming window, zero mean.
        let even = resample_uniform(timestamps, intensities);
        let windowed: Vec<f64> = even
            .iter()
            .zip(hamming_window(len))
            .map(|(value, weight)| value * weight)
            .collect();
        let mean = windowed.iter().sum::<f64>() / len as f64;
        let mut spectrum: Vec<Complex<f64>> = windowed.iter().map(|v| Complex::new(v - mean, 0.0)).collect();

        self.forward_fft(len).process(&mut spectrum);

        // Keep the one-sided half and restrict it to the band.
        let bin_hz = fps / len as f64;
        let mut frequencies_hz = Vec::new();
        let mut magnitudes = Vec::new();
        let mut phase = Vec::new();
        for (bin, value) in spectrum.iter().take(len / 2 + 1).enumerate() {
            let hz = bin_hz * bin as f64;
            let bpm = hz * 60.0;
            if bpm > self.band_min_bpm && bpm < self.band_max_bpm {
                frequencies_hz.push(hz);
                magnitudes.push(value.norm());
                phase.push(value.arg());
            }
        }
        if magnitudes.is_empty() {
            return Err(InsufficientData::EmptyBand);
        }
        if magnitudes.iter().all(|m| *m == 0.0) {
            return Err(InsufficientData::FlatSpectrum);
        }

        let mut peak_index = 0;
        for (i, magnitude) in magnitudes.iter().enumerate() {
            if *magnitude > magnitudes[peak_index] {
                peak_index = i;
            }
        }

        let bpm = frequencies_hz[peak_index] * 60.0;
        let blend_alpha = 0.9 * ((phase[peak_index].sin() + 1.0) / 2.0) + 0.1;
        trace!(bpm, fps, samples = len, "spectral estimate");

        Ok(&*self.latest.insert(SpectralResult {
            frequencies_hz,
            magnitudes,
            phase,
            peak_index,
            bpm,
            fps,
            blend_alpha,
        }))
    }

    fn forward_fft(&mut self, len: usize) -> Arc<dyn Fft<f64>> {
        match &self.plan {
            Some((planned, fft)) if *planned == len => Arc::clone(fft),
            _ => {
                let fft = FftPlanner::new().plan_fft_forward(len);
                self.plan = Some((len, Arc::clone(&fft)));
                fft
            }
        }
    }

    pub fn latest(&self) -> Option<&SpectralResult> {
        self.latest.as_ref()
    }

    /// Drops the latest result, e.g. when the region of interest changes.
    pub fn reset(&mut self) {
        self.latest = None;
    }
}

/// Linearly interpolates `values` (sampled at increasing `timestamps`) onto the same
/// number of evenly spaced instants spanning `[timestamps[0], timestamps[last]]`.
/// Instants outside the sampled range take the nearest end value.
pub fn resample_uniform(timestamps: &[f64], values: &[f64]) -> Vec<f64> {
    let len = timestamps.len().min(values.len());
    match len {
        0 => return Vec::new(),
        1 => return vec![values[0]],
        _ => {}
    }

    let first = timestamps[0];
    let last = timestamps[len - 1];
    let step = (last - first) / (len - 1) as f64;

    let mut resampled = Vec::with_capacity(len);
    let mut segment = 0;
    for i in 0..len {
        let t = if i == len - 1 { last } else { first + step * i as f64 };

        while segment + 2 < len && timestamps[segment + 1] < t {
            segment += 1;
        }
        let (t0, t1) = (timestamps[segment], timestamps[segment + 1]);
        let (v0, v1) = (values[segment], values[segment + 1]);

        let value = if t <= t0 {
            v0
        } else if t >= t1 {
            v1
        } else {
            v0 + (v1 - v0) * (t - t0) / (t1 - t0)
        };
        resampled.push(value);
    }
    resampled
}

/// Symmetric Hamming window of length `size`.
pub fn hamming_window(size: usize) -> Vec<f64> {
    if size == 1 {
        return vec![1.0];
    }
    let denom = (size - 1) as f64;
    (0..size)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / denom).cos())
        .collect()
}
