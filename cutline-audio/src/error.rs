//! Error types for cutline-audio
//!
//! Defines the crate error type plus [`IoFailure`], the per-operation I/O
//! failure record that renders and cache fills hand back to their caller
//! instead of aborting.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for cutline-audio
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported or inconsistent sample format
    #[error("Audio format error: {0}")]
    Format(String),

    /// Allocation failure while building a result
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Background cache worker failures
    #[error("Cache worker error: {0}")]
    Worker(String),

    /// Errors from the shared crate (event lists, config files)
    #[error(transparent)]
    Common(#[from] cutline_common::Error),
}

/// Convenience Result type using cutline-audio Error
pub type Result<T> = std::result::Result<T, Error>;

/// I/O operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Open,
    Read,
    Seek,
    Write,
}

impl fmt::Display for IoOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoOperation::Open => "open",
            IoOperation::Read => "read",
            IoOperation::Seek => "seek",
            IoOperation::Write => "write",
        };
        f.write_str(name)
    }
}

/// A failed file operation, reported once to the caller
///
/// `track` is `None` for failures on the render output rather than on a
/// source track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoFailure {
    pub track: Option<usize>,
    pub path: PathBuf,
    pub operation: IoOperation,
    pub message: String,
}

impl IoFailure {
    pub fn new(
        track: Option<usize>,
        path: impl Into<PathBuf>,
        operation: IoOperation,
        err: &std::io::Error,
    ) -> Self {
        Self {
            track,
            path: path.into(),
            operation,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.track {
            Some(track) => write!(
                f,
                "track {}: {} failed on {}: {}",
                track,
                self.operation,
                self.path.display(),
                self.message
            ),
            None => write!(
                f,
                "{} failed on {}: {}",
                self.operation,
                self.path.display(),
                self.message
            ),
        }
    }
}

impl std::error::Error for IoFailure {}
