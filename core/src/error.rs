//! Error taxonomy shared by every benchmark component.

use std::fmt;

pub type BenchResult<T> = std::result::Result<T, BenchError>;

#[derive(Debug)]
pub enum BenchError {
    /// Connection could not be established or was dropped. The only kind
    /// that is retried, and only at connect time.
    Connection(String),
    /// A query, insert or DDL statement failed on an open connection.
    Backend(String),
    /// A configuration could not be completed. Never retried.
    FatalConfiguration(String),
    /// A persisted document is unreadable, invalid or stale.
    CorruptState(String),
    /// Worker creation timed out or failed.
    ResourceExhaustion(String),
    /// Cancellation was requested before the unit of work could finish.
    Interrupted,
    InvalidSettings(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl BenchError {
    /// True for the errors the connect-time retry loop may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, BenchError::Connection(_))
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::Connection(s) => write!(f, "Connection error: {s}"),
            BenchError::Backend(s) => write!(f, "Backend error: {s}"),
            BenchError::FatalConfiguration(s) => write!(f, "Configuration failed: {s}"),
            BenchError::CorruptState(s) => write!(f, "Corrupt persisted state: {s}"),
            BenchError::ResourceExhaustion(s) => write!(f, "Resource exhaustion: {s}"),
            BenchError::Interrupted => write!(f, "Interrupted"),
            BenchError::InvalidSettings(s) => write!(f, "Invalid settings: {s}"),
            BenchError::Io(e) => write!(f, "IO error: {e}"),
            BenchError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BenchError::Io(e) => Some(e),
            BenchError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BenchError {
    fn from(e: std::io::Error) -> Self {
        BenchError::Io(e)
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(e: serde_json::Error) -> Self {
        BenchError::Json(e)
    }
}
