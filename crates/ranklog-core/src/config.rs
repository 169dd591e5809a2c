//! Logger configuration.
//!
//! Defaults mirror a quiet process: output goes to `ranklog.log` in the
//! system temp directory and the threshold is `Silent`. Both can be overridden
//! from the environment (`RANKLOG_OUTPUT`, `RANKLOG_LEVEL`) or set directly.

use std::path::PathBuf;

use tracing::warn;

use crate::error::{LogError, LogResult};
use crate::severity::Severity;

/// Environment variable naming the output file.
pub const ENV_OUTPUT: &str = "RANKLOG_OUTPUT";

/// Environment variable naming the threshold (`none`, `error`, `warn`, `info`).
pub const ENV_LEVEL: &str = "RANKLOG_LEVEL";

/// Default output file name inside the temp directory.
pub const DEFAULT_FILE_NAME: &str = "ranklog.log";

/// One-time logger setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Output file; fixed once a logger is built from this config
    pub output_path: PathBuf,
    /// Initial threshold
    pub threshold: Severity,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output_path: std::env::temp_dir().join(DEFAULT_FILE_NAME),
            threshold: Severity::Silent,
        }
    }
}

impl LogConfig {
    pub fn new(output_path: impl Into<PathBuf>, threshold: Severity) -> Self {
        Self {
            output_path: output_path.into(),
            threshold,
        }
    }

    /// Defaults, overridden by `RANKLOG_OUTPUT` / `RANKLOG_LEVEL` when set.
    ///
    /// An unparseable level is reported and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(ENV_OUTPUT) {
            if !path.trim().is_empty() {
                config.output_path = PathBuf::from(path);
            }
        }

        if let Ok(level) = std::env::var(ENV_LEVEL) {
            match level.parse() {
                Ok(threshold) => config.threshold = threshold,
                Err(e) => warn!(%level, error = %e, "Ignoring {}", ENV_LEVEL),
            }
        }

        config
    }

    /// Set the output path.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Set the threshold.
    pub fn with_threshold(mut self, threshold: Severity) -> Self {
        self.threshold = threshold;
        self
    }

    /// Reject paths that can never be opened as an append-only file.
    pub fn validate(&self) -> LogResult<()> {
        if self.output_path.as_os_str().is_empty() {
            return Err(LogError::output(
                &self.output_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty output path"),
            ));
        }
        if self.output_path.is_dir() {
            return Err(LogError::output(
                &self.output_path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "output path is a directory",
                ),
            ));
        }
        Ok(())
    }
}
