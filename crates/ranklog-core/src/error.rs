//! Error types for ranklog

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for ranklog operations
#[derive(Error, Debug)]
pub enum LogError {
    /// A severity value outside the known set reached the formatter
    #[error("Invalid severity: {0}")]
    InvalidSeverity(u8),

    /// The output file could not be opened or written
    #[error("Log output unavailable at {}: {source}", path.display())]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Logging or lifecycle call made in the wrong collector state
    #[error("Lifecycle misuse: {0}")]
    LifecycleMisuse(String),

    /// Group transport failure (connect, barrier, peer loss)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error during wire frame encoding/decoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    pub(crate) fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputUnavailable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn misuse(msg: impl Into<String>) -> Self {
        Self::LifecycleMisuse(msg.into())
    }
}

impl From<postcard::Error> for LogError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using LogError
pub type LogResult<T> = Result<T, LogError>;
