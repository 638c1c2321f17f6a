//! The top-level error surface a build can fail with (spec §7).
//!
//! Grounded on the `thiserror`-based error enum style used across the example pack
//! (`alkahest-core/src/error.rs`) rather than the teacher, which predates `thiserror`.

use thiserror::Error;

/// Errors the worker pool can encounter. Per-file failures never reach this type — they
/// are captured into the manifest's `FileStatus::Errored` instead (spec §7).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("chunk codec failed: {0}")]
    Codec(String),

    #[error("endpoint I/O failed after retries: {0}")]
    Endpoint(String),

    #[error("exhausted retry budget ({attempts} attempts) on {operation}")]
    RetryExhausted { operation: String, attempts: u32 },

    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },

    #[error("point descended past the maximum supported depth ({max_depth})")]
    MaxDepthExceeded { max_depth: u8 },
}

pub type BuildResult<T> = Result<T, BuildError>;
