//! The process-local logger: threshold gate plus the line writer.
//!
//! A `Logger` is built once by the process entry point and handed to
//! collaborators (usually as `Arc<Logger>`, or behind the [`Log`] trait).
//!
//! ## Threshold races
//!
//! The threshold is a relaxed atomic. A `set_threshold` racing with `log`
//! calls on other threads may let at most the borderline message(s) in
//! flight be gated by either the old or the new value. Writes that start
//! after `set_threshold` returns always see the new value.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::LogConfig;
use crate::error::LogResult;
use crate::record::{format_line, Origin};
use crate::severity::Severity;
use crate::writer::LineWriter;

/// Sole write entry point used by the rest of a workload.
///
/// Implemented by [`Logger`] for plain processes and by
/// [`Collector`](crate::collector::Collector) inside a distributed run.
pub trait Log: Send + Sync {
    /// Log `message` at `severity` if the threshold permits it.
    fn log(&self, severity: Severity, message: &str) -> LogResult<()>;

    /// Current threshold.
    fn threshold(&self) -> Severity;

    /// Output file path.
    fn output_path(&self) -> &Path;

    /// Whether a message at `severity` would be written.
    fn enabled(&self, severity: Severity) -> bool {
        severity.passes(self.threshold())
    }
}

/// Threshold-gated logger owning the output file.
pub struct Logger {
    threshold: AtomicU8,
    writer: LineWriter,
}

impl Logger {
    /// Build a logger from a validated config. The file is not opened yet.
    pub fn configure(config: LogConfig) -> LogResult<Self> {
        config.validate()?;
        Ok(Self {
            threshold: AtomicU8::new(config.threshold.rank()),
            writer: LineWriter::new(config.output_path),
        })
    }

    /// Set the threshold for subsequent writes.
    pub fn set_threshold(&self, threshold: Severity) {
        self.threshold.store(threshold.rank(), Ordering::Relaxed);
    }

    /// Gate and write one line with an explicit origin.
    pub fn log_from(&self, origin: Origin, severity: Severity, message: &str) -> LogResult<()> {
        if message.is_empty() || !self.enabled(severity) {
            return Ok(());
        }
        self.writer.write_line(&format_line(origin, severity, message)?)
    }

    /// Write an already gated line.
    ///
    /// Used by the sink for records a source has gated with its own threshold.
    pub(crate) fn write_through(
        &self,
        origin: Origin,
        severity: Severity,
        message: &str,
    ) -> LogResult<()> {
        if message.is_empty() {
            return Ok(());
        }
        self.writer.write_line(&format_line(origin, severity, message)?)
    }

    /// Flush the output file if it is open.
    pub fn flush(&self) -> LogResult<()> {
        self.writer.flush()
    }
}

impl Log for Logger {
    fn log(&self, severity: Severity, message: &str) -> LogResult<()> {
        self.log_from(Origin::Local, severity, message)
    }

    fn threshold(&self) -> Severity {
        // Only `set_threshold` stores, always from a valid Severity.
        Severity::try_from(self.threshold.load(Ordering::Relaxed)).unwrap_or_default()
    }

    fn output_path(&self) -> &Path {
        self.writer.path()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("threshold", &self.threshold())
            .field("output_path", &self.writer.path())
            .field("open", &self.writer.is_open())
            .finish()
    }
}
