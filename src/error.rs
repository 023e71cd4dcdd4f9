//! Crate error type.
//!
//! Two families live here:
//! - **precondition violations** (`M > K`, a probability vector that does not sum to
//!   `M`, mismatched vector lengths): programming or configuration errors, fatal to a run;
//! - **I/O and source conditions** (unreadable parameter file, a measurement source that
//!   never reports enough paths): reported to the caller before or instead of a run.
//!
//! LP infeasibility is deliberately absent: it is a normal [`crate::LpStatus`] outcome
//! and every constrained policy has a deterministic fallback for it.

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot select {m} paths out of {k}")]
    TooManyPaths { m: usize, k: usize },

    #[error("probability vector sums to {actual}, expected {expected} (tolerance 1e-3)")]
    ProbabilitySum { expected: usize, actual: f64 },

    #[error("dependent rounding selected {actual} paths, expected {expected}")]
    RoundingCardinality { expected: usize, actual: usize },

    #[error("vector length mismatch: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("path index {index} out of range for {len} paths")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid parameter {name}={value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("EXP3.M capping threshold alpha not found")]
    Exp3AlphaNotFound,

    #[error("cannot read parameter file {path}: {source}")]
    ParamFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed parameter file {path} line {line}: {details}")]
    ParamParse {
        path: PathBuf,
        line: usize,
        details: String,
    },

    #[error("cannot write log {path}: {source}")]
    LogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("measurement source unavailable: {details}")]
    SourceUnavailable { details: String },

    #[error("measurement source reported {have} paths after {waited_ms} ms, wanted {want}")]
    SourceTimeout {
        waited_ms: u128,
        want: usize,
        have: usize,
    },
}

impl Error {
    /// Whether this error is a violated contract (fatal; indicates a bug or bad configuration).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::TooManyPaths { .. }
                | Self::ProbabilitySum { .. }
                | Self::RoundingCardinality { .. }
                | Self::LengthMismatch { .. }
                | Self::IndexOutOfRange { .. }
                | Self::InvalidParameter { .. }
                | Self::Exp3AlphaNotFound
        )
    }
}

/// Fail with [`Error::LengthMismatch`] unless `left == right`.
pub(crate) fn ensure_same_len(left: usize, right: usize) -> Result<()> {
    if left == right {
        Ok(())
    } else {
        Err(Error::LengthMismatch { left, right })
    }
}
