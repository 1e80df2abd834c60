// THEORY:
// Every tunable of the engine lives in one explicit struct that is handed to the
// pipeline at construction time. Nothing downstream reads a global constant, so a
// test can build an engine with a tiny buffer or a shifted frequency band and get
// fully deterministic behavior. The defaults reproduce the field-tested values:
// a 250-sample window, estimates from the 11th sample on, a 50-180 BPM band, a
// 10 px jitter threshold and the forehead proportions (0.5, 0.18, 0.25, 0.15).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placement of the forehead sub-rectangle, as fractions of the face box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForeheadProportions {
    /// Horizontal centre of the forehead, relative to the face box width.
    pub center_x: f64,
    /// Vertical centre of the forehead, relative to the face box height.
    pub center_y: f64,
    /// Forehead width as a fraction of the face box width.
    pub width: f64,
    /// Forehead height as a fraction of the face box height.
    pub height: f64,
}

impl Default for ForeheadProportions {
    fn default() -> Self {
        Self {
            center_x: 0.5,
            center_y: 0.18,
            width: 0.25,
            height: 0.15,
        }
    }
}

/// Configuration for the PulsePipeline, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of intensity samples kept in the rolling window.
    pub buffer_capacity: usize,
    /// A spectrum is only computed once the buffer holds *more* than this many samples.
    pub min_samples: usize,
    /// Lower edge of the plausible heart-rate band (exclusive), in BPM.
    pub band_min_bpm: f64,
    /// Upper edge of the plausible heart-rate band (exclusive), in BPM.
    pub band_max_bpm: f64,
    /// A re-detected face must move its centre further than this (in pixels) to replace the held one.
    pub jitter_threshold_px: f64,
    pub forehead: ForeheadProportions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 250,
            min_samples: 10,
            band_min_bpm: 50.0,
            band_max_bpm: 180.0,
            jitter_threshold_px: 10.0,
            forehead: ForeheadProportions::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document; missing keys fall back to the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity", "must be at least 1"));
        }
        if self.min_samples < 2 {
            return Err(invalid("min_samples", "must be at least 2"));
        }
        if self.min_samples >= self.buffer_capacity {
            return Err(invalid(
                "min_samples",
                format!("must be below buffer_capacity ({})", self.buffer_capacity),
            ));
        }
        if !(self.band_min_bpm.is_finite() && self.band_max_bpm.is_finite()) || self.band_min_bpm < 0.0 {
            return Err(invalid("band_min_bpm", "band edges must be finite and non-negative"));
        }
        if self.band_min_bpm >= self.band_max_bpm {
            return Err(invalid(
                "band_max_bpm",
                format!("must exceed band_min_bpm ({})", self.band_min_bpm),
            ));
        }
        if !self.jitter_threshold_px.is_finite() || self.jitter_threshold_px < 0.0 {
            return Err(invalid("jitter_threshold_px", "must be finite and non-negative"));
        }

        let f = &self.forehead;
        for (field, value) in [
            ("forehead.center_x", f.center_x),
            ("forehead.center_y", f.center_y),
            ("forehead.width", f.width),
            ("forehead.height", f.height),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(field, format!("{value} is outside (0, 1]")));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
