// Error types for the counting engine.
//
// Nothing in the engine is fatal: a missing calibration is a normal state, and
// out-of-range thresholds are clamped silently. Errors exist only for requests the
// engine refuses to apply (malformed adjustments, unknown parameters) and for the
// registry and session plumbing around it. A refused request never changes state.

use thiserror::Error;

/// Result type for counting-engine operations.
pub type Result<T> = std::result::Result<T, CounterError>;

/// Identifier of a counting session inside a `SessionPool`.
pub type SessionId = u64;

#[derive(Error, Debug)]
pub enum CounterError {
    /// The operation needs thresholds, but the warm-up window is not full yet.
    #[error("Counter is not calibrated yet")]
    NotCalibrated,

    /// A parameter or adjustment value could not be used.
    #[error("Invalid value for `{name}`: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Unknown parameter `{0}`")]
    UnknownParameter(String),

    /// The parameter exists, but not for this kind of counter.
    #[error("Parameter `{name}` is not supported by {kind} counters")]
    UnsupportedParameter { name: String, kind: &'static str },

    #[error("Invalid counter configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse counter configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("No counter registered under `{0}`")]
    UnknownCounter(String),

    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("Session {0} already exists")]
    SessionExists(SessionId),

    /// The pool's workers have shut down.
    #[error("Session pool is closed")]
    PoolClosed,
}

impl CounterError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
