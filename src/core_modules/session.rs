// THEORY:
// The `session` module turns the continuous stream of per-frame estimates into
// discrete measurement records. A record starts when the caller locks the face
// and ends when the caller says stop; everything the engine estimated in between
// is accumulated, tagged with wall-clock time and the stimulus on screen.
//
// Key architectural principles:
// 1.  **Two States**: `Searching` (no record open) and `Measuring`. Only explicit
//     commands move between them; the session never ends itself.
// 2.  **Advisory Deadline**: Starting a record fixes `end_time`. The remaining
//     time is exposed so the caller can decide when to stop, nothing more.
// 3.  **Hand-Off by Draining**: The engine never pushes data anywhere. A
//     persistence collaborator calls `drain()`, which returns everything collected
//     since the previous drain exactly once.
// 4.  **Injected Time**: Operations take `now` explicitly; where that time comes
//     from is a `Clock`, so tests and offline replays are deterministic.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Source of wall-clock time in seconds since the Unix epoch.
pub trait Clock {
    fn now(&self) -> f64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A settable clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(now.to_bits())),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Parameters of the command that opens a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    #[serde(alias = "record_length")]
    pub record_length_seconds: i64,
    #[serde(alias = "number_of_records")]
    pub total_records_target: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Searching,
    Measuring,
}

/// One heart-rate estimate recorded during a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub bpm: f64,
    /// Wall-clock time of the estimate, seconds since the Unix epoch.
    pub timestamp: f64,
    /// The stimulus on screen when the estimate was made, if any.
    pub stimulus_label: Option<String>,
}

/// Aggregate of all samples recorded under one stimulus label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StimulusSummary {
    pub count: usize,
    pub mean_bpm: f64,
}

/// The measurement-session state machine.
#[derive(Debug, Clone)]
pub struct MeasurementSession {
    state: SessionState,
    start_time: Option<f64>,
    end_time: Option<f64>,
    record_length: f64,
    heart_rate_samples: Vec<HeartRateSample>,
    record_index: u32,
    total_records_target: u32,
}

impl Default for MeasurementSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Searching,
            start_time: None,
            end_time: None,
            record_length: 0.0,
            heart_rate_samples: Vec::new(),
            record_index: 0,
            total_records_target: 0,
        }
    }

    /// Opens a measurement window `[now, now + record_length]`.
    pub fn start(&mut self, params: SessionParams, now: f64) -> Result<(), SessionError> {
        if params.record_length_seconds <= 0 || params.total_records_target <= 0 {
            warn!(?params, "rejecting session start");
            return Err(SessionError::InvalidParameters {
                record_length_seconds: params.record_length_seconds,
                total_records_target: params.total_records_target,
            });
        }
        if self.state == SessionState::Measuring {
            return Err(SessionError::AlreadyMeasuring);
        }

        self.state = SessionState::Measuring;
        self.record_length = params.record_length_seconds as f64;
        self.total_records_target = u32::try_from(params.total_records_target).unwrap_or(u32::MAX);
        self.start_time = Some(now);
        self.end_time = Some(now + self.record_length);
        self.heart_rate_samples.clear();

        info!(
            record = self.record_index + 1,
            of = self.total_records_target,
            record_length = self.record_length,
            "measurement started"
        );
        Ok(())
    }

    /// Records a fresh estimate. Ignored (returns `false`) unless measuring.
    pub fn record(&mut self, bpm: f64, stimulus_label: Option<String>, now: f64) -> bool {
        if self.state != SessionState::Measuring {
            return false;
        }
        self.heart_rate_samples.push(HeartRateSample {
            bpm,
            timestamp: now,
            stimulus_label,
        });
        true
    }

    /// Closes the current measurement and counts it. Samples stay available to `drain`.
    pub fn stop(&mut self) -> Result<u32, SessionError> {
        if self.state != SessionState::Measuring {
            return Err(SessionError::NotMeasuring);
        }
        self.state = SessionState::Searching;
        self.record_index += 1;

        info!(
            record = self.record_index,
            of = self.total_records_target,
            samples = self.heart_rate_samples.len(),
            mean_bpm = mean_bpm(&self.heart_rate_samples),
            "measurement stopped"
        );
        Ok(self.record_index)
    }

    /// Returns every sample collected since the last drain and forgets them.
    pub fn drain(&mut self) -> Vec<HeartRateSample> {
        std::mem::take(&mut self.heart_rate_samples)
    }

    pub fn heart_rate_samples(&self) -> &[HeartRateSample] {
        &self.heart_rate_samples
    }

    /// Seconds until the advisory end of the current window; negative once past it.
    /// `None` before the first measurement has been started.
    pub fn remaining_time(&self, now: f64) -> Option<f64> {
        self.end_time.map(|end| end - now)
    }

    /// Whether a running measurement has reached its advisory end.
    pub fn is_expired(&self, now: f64) -> bool {
        self.state == SessionState::Measuring && self.remaining_time(now).is_some_and(|left| left <= 0.0)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_measuring(&self) -> bool {
        self.state == SessionState::Measuring
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    pub fn record_length(&self) -> f64 {
        self.record_length
    }

    pub fn record_index(&self) -> u32 {
        self.record_index
    }

    pub fn total_records_target(&self) -> u32 {
        self.total_records_target
    }

    pub fn records_remaining(&self) -> u32 {
        self.total_records_target.saturating_sub(self.record_index)
    }

    /// `true` once as many records as requested have been completed.
    pub fn is_complete(&self) -> bool {
        self.total_records_target > 0 && self.record_index >= self.total_records_target
    }
}

/// Mean BPM over `samples`, `None` when empty.
pub fn mean_bpm(samples: &[HeartRateSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.bpm).sum::<f64>() / samples.len() as f64)
}

/// Groups samples by stimulus label. Samples without a label are left out.
pub fn summarize_by_stimulus(samples: &[HeartRateSample]) -> BTreeMap<String, StimulusSummary> {
    let mut sums: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for sample in samples {
        if let Some(label) = &sample.stimulus_label {
            let entry = sums.entry(label.clone()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += sample.bpm;
        }
    }
    sums.into_iter()
        .map(|(label, (count, total))| {
            (
                label,
                StimulusSummary {
                    count,
                    mean_bpm: total / count as f64,
                },
            )
        })
        .collect()
}
