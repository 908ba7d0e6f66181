//! Core domain errors.

use thiserror::Error;

/// Core domain errors for the harness.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Job id cannot be used as a record key.
    #[error("Invalid job id '{0}': use ASCII letters, digits, '-', '_' or '.'")]
    InvalidJobId(String),

    /// A job parameter could not be parsed.
    #[error("Invalid value '{value}' for param '{key}': {reason}")]
    InvalidParam {
        key: String,
        value: String,
        reason: String,
    },

    /// Malformed `key=value` pair.
    #[error("Malformed param '{0}', expected key=value")]
    MalformedParam(String),

    /// Workload kind not recognised.
    #[error("Unknown workload: {0}")]
    UnknownWorkload(String),

    /// Device tier not recognised.
    #[error("Unknown device tier: {0}")]
    UnknownDevice(String),

    /// Digest algorithm not recognised.
    #[error("Unknown digest algorithm: {0}")]
    UnknownDigest(String),

    /// Invalid lifecycle transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}
