// THEORY:
// This file is the main entry point for the `pulse_vision` library crate.
// It defines the public API that external consumers (a camera driver loop, a GUI,
// a networking layer that uploads measurements) build against.
//
// The primary export is `PulsePipeline`, the single per-frame entry point of the
// heart-rate engine, together with its configuration (`EngineConfig`) and the
// result types it hands back (`FrameAnalysis`, `SpectralResult`,
// `HeartRateSample`). The analysis stages live in `core_modules` and can also be
// used on their own; everything that talks to hardware, screens or servers stays
// outside this crate behind the traits in `core_modules::interfaces`.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use config::{EngineConfig, ForeheadProportions};
pub use core_modules::bounding_box::BoundingBox;
pub use core_modules::frame::Frame;
pub use core_modules::session::{Clock, HeartRateSample, ManualClock, SessionParams, SystemClock};
pub use core_modules::spectral::SpectralResult;
pub use error::{ConfigError, SessionError};
pub use pipeline::{FrameAnalysis, FrameStatus, PulsePipeline};
