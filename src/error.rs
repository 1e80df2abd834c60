// THEORY:
// The engine has no fatal failure modes. Numerical degeneracies (too few samples,
// a zero-length time span, an empty frequency band) and a missing face are normal
// per-frame outcomes and are reported through `FrameStatus`, never as errors.
// The only things rejected outright are malformed session commands and malformed
// configuration, and those are the two error types below.

use thiserror::Error;

/// Rejections at the measurement-session boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(
        "invalid session parameters: record length {record_length_seconds}s, \
         {total_records_target} records (both must be positive)"
    )]
    InvalidParameters {
        record_length_seconds: i64,
        total_records_target: i64,
    },

    #[error("a measurement is already in progress")]
    AlreadyMeasuring,

    #[error("no measurement is in progress")]
    NotMeasuring,
}

/// Problems loading or validating an `EngineConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
