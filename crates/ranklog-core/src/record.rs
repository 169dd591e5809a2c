//! Log records and the line format.
//!
//! A record only ever exists transiently: it is formatted into one line of
//! the output file, or carried to the sink as a [`WireRecord`].
//!
//! ## Line Format
//!
//! ```text
//! <origin> - [<tag>]<pad to 13 columns><message>
//!
//! local - [warn]       disk almost full
//! P3 - [error]      prototype count mismatch
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LogResult;
use crate::severity::Severity;

/// Rank number of a process inside a group.
pub type Rank = usize;

/// Where a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Written by a process outside any distributed run
    Local,
    /// Written on behalf of the given group rank
    Rank(Rank),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => f.write_str("local"),
            Origin::Rank(rank) => write!(f, "P{}", rank),
        }
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub origin: Origin,
    pub severity: Severity,
    pub message: String,
}

impl LogRecord {
    pub fn new(origin: Origin, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            origin,
            severity,
            message: message.into(),
        }
    }

    /// Format as one output line (no trailing newline).
    pub fn to_line(&self) -> LogResult<String> {
        format_line(self.origin, self.severity, &self.message)
    }
}

/// Payload a source sends to the sink.
///
/// The origin is not part of the payload: the sink stamps it from the
/// sender rank its transport verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub severity: Severity,
    pub message: String,
}

impl WireRecord {
    /// Attach the sender's rank.
    pub fn into_record(self, from: Rank) -> LogRecord {
        LogRecord::new(Origin::Rank(from), self.severity, self.message)
    }
}

/// Format one output line.
pub fn format_line(origin: Origin, severity: Severity, message: &str) -> LogResult<String> {
    Ok(format!("{} - {}{}", origin, severity.padded_tag()?, message))
}
