//! Pipeline error types.
//!
//! Faults are partitioned by where they are handled: buffer access and
//! per-cycle faults are absorbed by the monitor loop, persistence failures
//! surface to the caller, and analysis timeouts degrade to partial results
//! without invalidating an already-completed raw save.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The shared text buffer could not be read this cycle.
    #[error("buffer access failed: {0}")]
    Access(String),

    /// Content exceeds the configured byte ceiling. Checked before any I/O.
    #[error("content too large: {size} bytes exceeds limit of {limit} bytes")]
    SizeLimitExceeded { size: usize, limit: usize },

    /// Directory or file I/O failure. The atomic-rename write protocol
    /// guarantees no partial file is visible under the final name.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// Per-chunk or whole-document analysis deadline exceeded.
    #[error("analysis timed out after {0:.1}s")]
    AnalysisTimeout(f64),
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::Persistence(e.to_string())
    }
}
