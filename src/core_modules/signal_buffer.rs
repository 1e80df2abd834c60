// THEORY:
// The `SignalBuffer` is the engine's short-term memory: a sliding window of
// (timestamp, forehead intensity) samples from which the spectrum is computed.
//
// Its invariants are enforced at the only place data enters it, `append`:
// - it never holds more than `capacity` samples; the oldest are evicted first;
// - timestamps are strictly increasing, so the series never needs re-sorting.
// Continuity across a change of face is not checked here; whoever changes the
// region of interest clears the buffer first.

use std::collections::VecDeque;
use tracing::trace;

/// One forehead mean-intensity reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub intensity: f64,
}

/// A bounded, time-ordered window of samples with FIFO eviction.
#[derive(Debug, Clone)]
pub struct SignalBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl SignalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Appends a sample, evicting from the front once over capacity.
    ///
    /// Returns `false` and leaves the buffer untouched when the value is not
    /// finite or the timestamp does not advance past the newest sample.
    pub fn append(&mut self, timestamp: f64, intensity: f64) -> bool {
        if !timestamp.is_finite() || !intensity.is_finite() {
            trace!(timestamp, intensity, "dropping non-finite sample");
            return false;
        }
        if let Some(last) = self.samples.back() {
            if timestamp <= last.timestamp {
                trace!(timestamp, last = last.timestamp, "dropping out-of-order sample");
                return false;
            }
        }

        self.samples.push_back(Sample { timestamp, intensity });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The samples, oldest first.
    pub fn samples(&self) -> &VecDeque<Sample> {
        &self.samples
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    pub fn intensities(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.intensity).collect()
    }

    /// Time between the oldest and the newest sample, `0.0` with fewer than two.
    pub fn span(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }
}
