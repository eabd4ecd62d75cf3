//! Shared-buffer read seam.
//!
//! The underlying primitive that reads the shared text buffer is an external
//! collaborator. The monitor only needs a synchronous, side-effect-free
//! `read` that may fail, so it talks to this trait instead of any platform
//! API.

use std::path::PathBuf;

use crate::error::CaptureError;

/// Atomic read of the shared text buffer. `Ok(None)` means the buffer is
/// empty; errors are absorbed by the monitor as a skipped poll cycle.
pub trait ClipboardSource: Send + Sync {
    fn read(&self) -> Result<Option<String>, CaptureError>;
}

/// File-backed buffer: reads a spool file on every poll. Lets the pipeline
/// run on any platform and under test without a desktop clipboard — whatever
/// writes the file plays the role of the copy operation.
pub struct FileBuffer {
    path: PathBuf,
}

impl FileBuffer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl ClipboardSource for FileBuffer {
    fn read(&self) -> Result<Option<String>, CaptureError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| CaptureError::Access(e.to_string()))?;
        if content.is_empty() {
            Ok(None)
        } else {
            Ok(Some(content))
        }
    }
}
