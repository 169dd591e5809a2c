//! Append-only line writer for the sink's log file.
//!
//! The file is opened lazily in append mode on the first write and kept open
//! for the writer's lifetime. Every line is written and flushed under one
//! mutex, so concurrent callers never interleave partial lines.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{LogError, LogResult};

/// Writer that appends lines to a single log file.
pub struct LineWriter {
    /// Path to the log file, fixed at construction
    path: PathBuf,

    /// Buffered file handle, opened on first write
    file: Mutex<Option<BufWriter<File>>>,
}

impl LineWriter {
    /// Create a writer for `path`. Nothing is opened until the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// Get the path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file handle has been opened yet.
    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Append one line followed by a newline, then flush.
    ///
    /// An empty line is a no-op.
    pub fn write_line(&self, line: &str) -> LogResult<()> {
        if line.is_empty() {
            return Ok(());
        }

        let mut guard = self.file.lock();
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| LogError::output(&self.path, e))?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{}", line)
                .and_then(|_| writer.flush())
                .map_err(|e| LogError::output(&self.path, e))?;
        }

        Ok(())
    }

    /// Flush any buffered data to disk.
    pub fn flush(&self) -> LogResult<()> {
        match self.file.lock().as_mut() {
            Some(writer) => writer.flush().map_err(|e| LogError::output(&self.path, e)),
            None => Ok(()),
        }
    }
}

impl Drop for LineWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_file_opened_lazily() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.log");

        let writer = LineWriter::new(&path);
        assert!(!writer.is_open());
        assert!(!path.exists());

        writer.write_line("first").unwrap();
        assert!(writer.is_open());
        assert!(path.exists());
    }

    #[test]
    fn test_writer_appends_to_existing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.log");
        fs::write(&path, "earlier\n").unwrap();

        let writer = LineWriter::new(&path);
        writer.write_line("First message").unwrap();
        writer.write_line("Second message").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec!["earlier", "First message", "Second message"]);
    }

    #[test]
    fn test_empty_line_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.log");

        let writer = LineWriter::new(&path);
        writer.write_line("").unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_open_failure_is_surfaced() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing-dir").join("run.log");

        let writer = LineWriter::new(&path);
        let err = writer.write_line("lost").unwrap_err();
        assert!(matches!(err, LogError::OutputUnavailable { .. }));
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.log");
        let writer = Arc::new(LineWriter::new(&path));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let writer = writer.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        writer
                            .write_line(&format!("thread-{}-line-{}-{}", t, i, "x".repeat(64)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            assert!(line.starts_with("thread-"));
            assert!(line.ends_with(&"x".repeat(64)));
        }
    }
}
