//! Error types for gtm operations.

use std::fmt;
use std::io;

/// All possible gtm errors.
#[derive(Debug)]
pub enum GtmError {
    /// The repository has not been initialized for time tracking.
    NotInitialized,
    /// A recorded file does not exist and is not a synthetic event source.
    FileNotFound(String),
    /// A metric file could not be parsed. Callers skip the record; the
    /// file stays on disk for inspection.
    InvalidMetric(String),
    /// An error from the underlying git repository.
    Git(git2::Error),
    /// An I/O error occurred.
    Io(io::Error),
    /// JSON serialization/deserialization failed.
    Json(serde_json::Error),
    /// Could not acquire the repository lock within the timeout.
    LockTimeout,
    /// Generic error with a message.
    Other(String),
}

impl fmt::Display for GtmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GtmError::NotInitialized => {
                write!(f, "Git Time Metric is not initialized (missing .gtm/)")
            }
            GtmError::FileNotFound(path) => write!(f, "file does not exist: {path}"),
            GtmError::InvalidMetric(path) => write!(f, "unable to parse metric file {path}"),
            GtmError::Git(e) => write!(f, "git error: {}", e.message()),
            GtmError::Io(e) => write!(f, "I/O error: {e}"),
            GtmError::Json(e) => write!(f, "JSON error: {e}"),
            GtmError::LockTimeout => write!(f, "could not acquire repository lock within timeout"),
            GtmError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for GtmError {}

impl From<io::Error> for GtmError {
    fn from(e: io::Error) -> Self {
        GtmError::Io(e)
    }
}

impl From<serde_json::Error> for GtmError {
    fn from(e: serde_json::Error) -> Self {
        GtmError::Json(e)
    }
}

impl From<git2::Error> for GtmError {
    fn from(e: git2::Error) -> Self {
        GtmError::Git(e)
    }
}

/// Convenience alias for Results in gtm.
pub type GtmResult<T> = Result<T, GtmError>;
