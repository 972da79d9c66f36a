//! Error types shared across the correlation engine.

use thiserror::Error;

/// Errors produced while decoding a `traceparent` header.
///
/// These are always recovered locally: a malformed header is logged,
/// ignored, and extraction falls through to the legacy format.
#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PropagationError {
    /// The header did not contain exactly four dash-separated fields.
    #[error("traceparent has {0} fields, expected 4")]
    FieldCount(usize),

    /// The version field was not the supported `00`.
    ///
    /// Unknown versions are rejected rather than parsed leniently; accepting
    /// them is additive future work.
    #[error("unsupported traceparent version {0:?}")]
    UnsupportedVersion(String),

    /// The trace-id field was not 32 lowercase hex characters, or was all
    /// zeros.
    #[error("invalid trace id in traceparent")]
    InvalidTraceId,

    /// The parent-id field was not 16 lowercase hex characters, or was all
    /// zeros.
    #[error("invalid span id in traceparent")]
    InvalidSpanId,

    /// The trace-flags field was not 2 lowercase hex characters.
    #[error("invalid trace flags in traceparent")]
    InvalidTraceFlags,
}

/// Errors surfaced by correlation-context constructors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CorrelationError {
    /// The id source kept producing all-zero identifiers.
    ///
    /// All-zero ids read as "absent" to downstream backends, so they are
    /// retried; running out of retries means the random source is broken
    /// and the caller has to know.
    #[error("id generator produced all-zero ids after {attempts} attempts")]
    IdGeneration {
        /// Number of generation attempts made before giving up.
        attempts: usize,
    },

    /// A header failed to decode.
    #[error(transparent)]
    Propagation(#[from] PropagationError),
}
