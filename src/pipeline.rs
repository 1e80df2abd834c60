// THEORY:
// The `pipeline` module is the top-level API of the heart-rate engine. It owns one
// instance of every analysis stage and runs them in order for each camera frame:
//
//   frame -> ROI tracker (search: evaluate candidates / lock: hold the face)
//         -> forehead mean intensity -> signal buffer
//         -> spectral estimator -> measurement session
//
// Everything happens synchronously inside `process_frame`; nothing is spawned and
// nothing blocks, so a driver may call it from whatever thread owns the camera.
// The only things the pipeline reports back are values: the latest spectrum, the
// current face and forehead boxes, and a `FrameStatus` explaining what happened.

use crate::config::EngineConfig;
use crate::core_modules::bounding_box::BoundingBox;
use crate::core_modules::frame::Frame;
use crate::core_modules::interfaces::{FaceDetector, StimulusProvider};
use crate::core_modules::roi_tracker::RoiTracker;
use crate::core_modules::session::{
    Clock, HeartRateSample, MeasurementSession, SessionParams, SessionState, SystemClock,
};
use crate::core_modules::signal_buffer::SignalBuffer;
use crate::core_modules::spectral::{InsufficientData, SpectralEstimator, SpectralResult};
use crate::error::{ConfigError, SessionError};
use tracing::{debug, warn};

/// What the engine did with a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameStatus {
    /// Search mode: candidates were evaluated, nothing was sampled.
    Searching,
    /// Lock mode without a usable face; the frame was not sampled.
    NoFaceLocked,
    /// Sampled, but the buffer does not yet hold enough samples for a spectrum.
    Collecting { buffered: usize, needed: usize },
    /// Lock mode, but the buffer refused the sample (timestamp not after the last
    /// one, or a non-finite intensity). Nothing was recomputed or recorded.
    SampleRejected,
    /// Sampled, but the spectrum could not produce an estimate this frame.
    InsufficientData(InsufficientData),
    /// Sampled and a fresh heart-rate estimate was produced.
    Estimating,
}

/// The output of the pipeline for a single frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub status: FrameStatus,
    /// The latest spectrum, fresh or retained from an earlier frame.
    pub spectrum: Option<SpectralResult>,
    /// Whether `spectrum` was computed from this frame.
    pub fresh: bool,
    /// Whether a `HeartRateSample` was recorded for this frame.
    pub recorded: bool,
    pub face_box: BoundingBox,
    pub forehead_box: BoundingBox,
    /// Number of samples in the signal buffer after this frame.
    pub buffered: usize,
}

impl FrameAnalysis {
    pub fn bpm(&self) -> Option<f64> {
        self.spectrum.as_ref().map(|s| s.bpm)
    }
}

/// The main, top-level struct for the heart-rate engine.
pub struct PulsePipeline<C: Clock = SystemClock> {
    tracker: RoiTracker,
    signal: SignalBuffer,
    estimator: SpectralEstimator,
    session: MeasurementSession,
    clock: C,
    config: EngineConfig,
}

impl PulsePipeline {
    /// A pipeline stamping recorded samples with the system wall clock.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> PulsePipeline<C> {
    pub fn with_clock(config: EngineConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tracker: RoiTracker::new(config.jitter_threshold_px, config.forehead),
            signal: SignalBuffer::new(config.buffer_capacity),
            estimator: SpectralEstimator::new(config.min_samples, config.band_min_bpm, config.band_max_bpm),
            session: MeasurementSession::new(),
            clock,
            config,
        })
    }

    /// Runs every stage for one frame. `candidates` are the detector's face boxes for
    /// this frame; they are only looked at in search mode.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        candidates: &[BoundingBox],
        stimulus_label: Option<&str>,
    ) -> FrameAnalysis {
        let face_box = self.tracker.detect_or_hold(candidates);
        let forehead_box = self.tracker.forehead_roi(&face_box);

        let status = if !self.tracker.is_locked() {
            FrameStatus::Searching
        } else {
            self.sample_and_estimate(frame, &forehead_box, stimulus_label)
        };

        let fresh = status == FrameStatus::Estimating;
        FrameAnalysis {
            status,
            spectrum: self.estimator.latest().cloned(),
            fresh,
            recorded: fresh && self.session.is_measuring(),
            face_box,
            forehead_box,
            buffered: self.signal.len(),
        }
    }

    /// Like `process_frame`, but asks `detector` for candidates (search mode only,
    /// on an equalised grayscale copy) and `stimulus` for the current label.
    pub fn process_with<D, S>(&mut self, frame: &Frame, detector: &mut D, stimulus: &S) -> FrameAnalysis
    where
        D: FaceDetector + ?Sized,
        S: StimulusProvider + ?Sized,
    {
        let candidates = if self.tracker.is_locked() {
            Vec::new()
        } else {
            detector.detect(&frame.equalized_grayscale())
        };
        let label = stimulus.current_label();
        self.process_frame(frame, &candidates, label.as_deref())
    }

    fn sample_and_estimate(
        &mut self,
        frame: &Frame,
        forehead_box: &BoundingBox,
        stimulus_label: Option<&str>,
    ) -> FrameStatus {
        if !self.tracker.has_face() {
            return FrameStatus::NoFaceLocked;
        }
        let Some(intensity) = frame.region_mean_intensity(forehead_box) else {
            debug!(?forehead_box, "forehead lies outside the frame");
            return FrameStatus::NoFaceLocked;
        };
        if !self.signal.append(frame.timestamp, intensity) {
            debug!(timestamp = frame.timestamp, intensity, "sample rejected by the signal buffer");
            return FrameStatus::SampleRejected;
        }

        let bpm = match self.estimator.recompute(&self.signal) {
            Ok(result) => result.bpm,
            Err(InsufficientData::TooFewSamples { have, needed }) => {
                return FrameStatus::Collecting {
                    buffered: have,
                    needed,
                };
            }
            Err(reason) => return FrameStatus::InsufficientData(reason),
        };

        if self.session.is_measuring() {
            let now = self.clock.now();
            self.session.record(bpm, stimulus_label.map(String::from), now);
        }
        FrameStatus::Estimating
    }

    /// Locks the face and opens a measurement window.
    pub fn start_session(&mut self, params: SessionParams) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.session.start(params, now)?;
        if !self.tracker.has_face() {
            warn!("measurement started without a detected face; frames will be skipped");
        }
        self.tracker.set_locked(true);
        self.restart_signal();
        Ok(())
    }

    /// Closes the measurement window and returns to face search.
    /// Returns the number of completed records.
    pub fn stop_session(&mut self) -> Result<u32, SessionError> {
        let completed = self.session.stop()?;
        self.tracker.set_locked(false);
        self.restart_signal();
        Ok(completed)
    }

    /// Flips the face lock without opening a measurement. Returns `true` when locked.
    /// The lock belongs to the session while one is running, so this is refused then.
    pub fn toggle_lock(&mut self) -> Result<bool, SessionError> {
        if self.session.is_measuring() {
            warn!("lock toggle ignored while a measurement is running");
            return Err(SessionError::AlreadyMeasuring);
        }
        let locked = self.tracker.toggle_lock();
        self.restart_signal();
        Ok(locked)
    }

    fn restart_signal(&mut self) {
        self.signal.clear();
        self.estimator.reset();
    }

    pub fn drain(&mut self) -> Vec<HeartRateSample> {
        self.session.drain()
    }

    pub fn heart_rate_samples(&self) -> &[HeartRateSample] {
        self.session.heart_rate_samples()
    }

    /// Seconds until the advisory end of the measurement window.
    pub fn remaining_time(&self) -> Option<f64> {
        self.session.remaining_time(self.clock.now())
    }

    pub fn is_expired(&self) -> bool {
        self.session.is_expired(self.clock.now())
    }

    pub fn record_index(&self) -> u32 {
        self.session.record_index()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &MeasurementSession {
        &self.session
    }

    pub fn is_locked(&self) -> bool {
        self.tracker.is_locked()
    }

    pub fn current_face_box(&self) -> BoundingBox {
        self.tracker.current_face()
    }

    pub fn current_forehead_box(&self) -> BoundingBox {
        self.tracker.current_forehead()
    }

    pub fn latest_spectrum(&self) -> Option<&SpectralResult> {
        self.estimator.latest()
    }

    pub fn signal(&self) -> &SignalBuffer {
        &self.signal
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::interfaces::{FixedStimulus, NoStimulus};
    use crate::core_modules::session::ManualClock;
    use image::{GrayImage, Rgb, RgbImage};
    use std::f64::consts::PI;

    const FACE: BoundingBox = BoundingBox {
        x: 8,
        y: 8,
        width: 48,
        height: 48,
    };

    fn uniform_frame(level: f64, timestamp: f64) -> Frame {
        let v = level.round().clamp(0.0, 255.0) as u8;
        Frame::new(RgbImage::from_pixel(64, 64, Rgb([v, v, v])), timestamp)
    }

    fn pulse_level(t: f64) -> f64 {
        128.0 + 20.0 * (2.0 * PI * 72.0 / 60.0 * t).sin()
    }

    fn pipeline(clock: &ManualClock) -> PulsePipeline<ManualClock> {
        PulsePipeline::with_clock(EngineConfig::default(), clock.clone()).unwrap()
    }

    fn params(length: i64, target: i64) -> SessionParams {
        SessionParams {
            record_length_seconds: length,
            total_records_target: target,
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            buffer_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(PulsePipeline::new(config).is_err());
    }

    #[test]
    fn search_mode_tracks_but_does_not_sample() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        let analysis = p.process_frame(&uniform_frame(100.0, 0.0), &[FACE], None);

        assert_eq!(analysis.status, FrameStatus::Searching);
        assert_eq!(analysis.face_box, FACE);
        assert_eq!(analysis.forehead_box, p.current_forehead_box());
        assert_eq!(analysis.buffered, 0);
        assert!(analysis.spectrum.is_none());
    }

    #[test]
    fn locking_without_a_face_skips_sampling() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        p.start_session(params(10, 1)).unwrap();

        for i in 0..20 {
            let analysis = p.process_frame(&uniform_frame(100.0, i as f64 * 0.1), &[FACE], None);
            assert_eq!(analysis.status, FrameStatus::NoFaceLocked);
            assert_eq!(analysis.face_box, BoundingBox::SENTINEL);
        }
        assert!(p.signal().is_empty());
    }

    #[test]
    fn invalid_session_leaves_the_pipeline_searching() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        assert!(p.start_session(params(-5, 1)).is_err());
        assert_eq!(p.session_state(), SessionState::Searching);
        assert!(!p.is_locked());
    }

    #[test]
    fn spectrum_is_unchanged_until_the_buffer_exceeds_ten() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        p.process_frame(&uniform_frame(100.0, 0.0), &[FACE], None);
        assert_eq!(p.toggle_lock(), Ok(true));

        for i in 1..=10 {
            let t = i as f64 * 0.25;
            let analysis = p.process_frame(&uniform_frame(pulse_level(t), t), &[], None);
            assert_eq!(
                analysis.status,
                FrameStatus::Collecting {
                    buffered: i,
                    needed: 11
                }
            );
            assert!(analysis.spectrum.is_none());
            assert!(!analysis.fresh);
        }

        let analysis = p.process_frame(&uniform_frame(pulse_level(2.75), 2.75), &[], None);
        assert_eq!(analysis.status, FrameStatus::Estimating);
        assert!(analysis.fresh);
        // Locked without a session: nothing is recorded.
        assert!(!analysis.recorded);
        assert!(p.heart_rate_samples().is_empty());
    }

    #[test]
    fn end_to_end_measurement() {
        let clock = ManualClock::new(1_700_000_000.0);
        let mut p = pipeline(&clock);
        let stimulus = FixedStimulus(Some("landscape".to_string()));

        let mut detector = |_: &GrayImage| vec![FACE];
        p.process_with(&uniform_frame(128.0, 0.0), &mut detector, &stimulus);
        assert_eq!(p.current_face_box(), FACE);

        p.start_session(params(10, 1)).unwrap();
        assert_eq!(p.remaining_time(), Some(10.0));

        let mut frames_over_threshold = 0;
        for i in 1..=40 {
            clock.advance(0.25);
            let t = i as f64 * 0.25;
            let analysis = p.process_with(&uniform_frame(pulse_level(t), t), &mut detector, &stimulus);
            if analysis.buffered > 10 {
                frames_over_threshold += 1;
                assert!(analysis.recorded);
                let bpm = analysis.bpm().unwrap();
                assert!(bpm > 50.0 && bpm < 180.0);
            }
        }
        assert_eq!(frames_over_threshold, 30);
        assert!(p.is_expired());
        assert_eq!(p.remaining_time(), Some(0.0));

        let samples = p.heart_rate_samples();
        assert_eq!(samples.len(), frames_over_threshold);
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(samples.iter().all(|s| s.stimulus_label.as_deref() == Some("landscape")));

        assert_eq!(p.stop_session(), Ok(1));
        assert_eq!(p.record_index(), 1);
        assert!(p.session().is_complete());
        assert!(!p.is_locked());
        assert!(p.signal().is_empty());
        assert!(p.latest_spectrum().is_none());

        assert_eq!(p.drain().len(), 30);
        assert!(p.drain().is_empty());
    }

    #[test]
    fn long_measurement_converges_on_the_pulse() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        p.process_frame(&uniform_frame(128.0, 0.0), &[FACE], None);
        p.start_session(params(30, 1)).unwrap();

        let mut last = None;
        for i in 1..=250 {
            let t = i as f64 / 30.0;
            clock.set(t);
            last = p.process_frame(&uniform_frame(pulse_level(t), t), &[], None).bpm();
        }
        let bpm = last.unwrap();
        assert!((bpm - 72.0).abs() <= 2.0, "bpm was {bpm}");
        assert_eq!(p.signal().len(), 250);
    }

    #[test]
    fn detector_only_runs_while_searching() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        let mut calls = 0;
        let mut detector = |_: &GrayImage| {
            calls += 1;
            vec![FACE]
        };

        p.process_with(&uniform_frame(100.0, 0.0), &mut detector, &NoStimulus);
        p.start_session(params(10, 1)).unwrap();
        for i in 1..5 {
            p.process_with(&uniform_frame(100.0, i as f64), &mut detector, &NoStimulus);
        }
        p.stop_session().unwrap();
        p.process_with(&uniform_frame(100.0, 9.0), &mut detector, &NoStimulus);

        assert_eq!(calls, 2);
    }

    #[test]
    fn pipeline_can_move_to_a_worker_thread() {
        fn assert_send<T: Send>() {}
        assert_send::<PulsePipeline<ManualClock>>();
        assert_send::<PulsePipeline>();
    }

    #[test]
    fn repeated_timestamp_is_not_recorded_twice() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        p.process_frame(&uniform_frame(128.0, 0.0), &[FACE], None);
        p.start_session(params(30, 1)).unwrap();

        for i in 1..=12 {
            let t = i as f64 * 0.25;
            clock.set(t);
            p.process_frame(&uniform_frame(pulse_level(t), t), &[], None);
        }
        assert_eq!(p.signal().len(), 12);
        assert_eq!(p.heart_rate_samples().len(), 2);
        let before = p.latest_spectrum().cloned();

        let analysis = p.process_frame(&uniform_frame(pulse_level(3.0), 3.0), &[], None);
        assert_eq!(analysis.status, FrameStatus::SampleRejected);
        assert!(!analysis.fresh);
        assert!(!analysis.recorded);
        assert_eq!(analysis.buffered, 12);
        assert_eq!(p.heart_rate_samples().len(), 2);
        assert_eq!(p.latest_spectrum().cloned(), before);

        let analysis = p.process_frame(&uniform_frame(pulse_level(2.0), 2.0), &[], None);
        assert_eq!(analysis.status, FrameStatus::SampleRejected);
        assert_eq!(p.heart_rate_samples().len(), 2);
    }

    #[test]
    fn earlier_estimate_survives_a_frame_without_one() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        p.process_frame(&uniform_frame(128.0, 0.0), &[FACE], None);
        p.start_session(params(3600, 1)).unwrap();

        for i in 1..=11 {
            let t = i as f64 * 0.25;
            clock.set(t);
            p.process_frame(&uniform_frame(pulse_level(t), t), &[], None);
        }
        let estimate = p.latest_spectrum().cloned().expect("estimate after 11 samples");
        assert_eq!(p.heart_rate_samples().len(), 1);

        // A long capture gap drops the effective rate so far that no bin lands in the band.
        let t = 1000.0;
        clock.set(t);
        let analysis = p.process_frame(&uniform_frame(pulse_level(t), t), &[], None);
        assert_eq!(analysis.status, FrameStatus::InsufficientData(InsufficientData::EmptyBand));
        assert!(!analysis.fresh);
        assert!(!analysis.recorded);
        assert_eq!(analysis.buffered, 12);
        assert_eq!(analysis.spectrum.as_ref(), Some(&estimate));
        assert_eq!(p.latest_spectrum(), Some(&estimate));
        assert_eq!(p.heart_rate_samples().len(), 1);
    }

    #[test]
    fn lock_cannot_be_toggled_during_a_measurement() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        p.process_frame(&uniform_frame(128.0, 0.0), &[FACE], None);
        p.start_session(params(10, 1)).unwrap();

        assert_eq!(p.toggle_lock(), Err(SessionError::AlreadyMeasuring));
        assert!(p.is_locked());
        assert_eq!(p.session_state(), SessionState::Measuring);

        p.stop_session().unwrap();
        assert_eq!(p.toggle_lock(), Ok(true));
        assert_eq!(p.toggle_lock(), Ok(false));
    }

    #[test]
    fn stop_without_session_is_rejected() {
        let clock = ManualClock::new(0.0);
        let mut p = pipeline(&clock);
        assert_eq!(p.stop_session(), Err(SessionError::NotMeasuring));
        assert_eq!(p.record_index(), 0);
    }
}
