//! Severity levels and the threshold gate.
//!
//! The ordering looks inverted compared to most logging crates: `Info` has
//! the highest rank and is the *most* verbose threshold, `Silent` has the
//! lowest and suppresses everything. A message passes when its rank is no
//! higher than the configured threshold's rank.
//!
//! ```text
//! threshold   Error   Warning   Info
//! Silent        -        -        -
//! Error         x        -        -
//! Warning       x        x        -
//! Info          x        x        x
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};

/// Width of the bracketed tag column, so messages line up.
const TAG_COLUMN: usize = 13;

/// Ordered log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    /// Threshold that suppresses everything; never a valid message severity
    #[default]
    Silent = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
}

impl Severity {
    /// All severities in rank order.
    pub const ALL: [Severity; 4] = [
        Severity::Silent,
        Severity::Error,
        Severity::Warning,
        Severity::Info,
    ];

    /// Numeric rank.
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Whether a message at `self` passes the given threshold.
    pub fn passes(self, threshold: Severity) -> bool {
        threshold != Severity::Silent && self != Severity::Silent && self <= threshold
    }

    /// Tag used in the output line.
    ///
    /// `Silent` has no tag: reaching the formatter with it is a bug in the
    /// caller, so it fails rather than producing a malformed line.
    pub fn tag(self) -> LogResult<&'static str> {
        match self {
            Severity::Info => Ok("info"),
            Severity::Warning => Ok("warn"),
            Severity::Error => Ok("error"),
            Severity::Silent => Err(LogError::InvalidSeverity(self.rank())),
        }
    }

    /// `[tag]` padded to the fixed tag column.
    pub(crate) fn padded_tag(self) -> LogResult<String> {
        let tag = format!("[{}]", self.tag()?);
        Ok(format!("{:<width$}", tag, width = TAG_COLUMN))
    }
}

impl TryFrom<u8> for Severity {
    type Error = LogError;

    fn try_from(value: u8) -> Result<Self, LogError> {
        match value {
            0 => Ok(Severity::Silent),
            1 => Ok(Severity::Error),
            2 => Ok(Severity::Warning),
            3 => Ok(Severity::Info),
            other => Err(LogError::InvalidSeverity(other)),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Silent => "silent",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(name)
    }
}

/// Error returned when a severity name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSeverityError(String);

impl fmt::Display for ParseSeverityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown severity '{}' (expected none, error, warn or info)",
            self.0
        )
    }
}

impl std::error::Error for ParseSeverityError {}

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "silent" | "off" => Ok(Severity::Silent),
            "error" => Ok(Severity::Error),
            "warn" | "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_total() {
        assert!(Severity::Silent < Severity::Error);
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
    }

    #[test]
    fn test_gate_truth_table() {
        for threshold in Severity::ALL {
            for severity in Severity::ALL {
                let expected = threshold != Severity::Silent
                    && severity != Severity::Silent
                    && severity.rank() <= threshold.rank();
                assert_eq!(
                    severity.passes(threshold),
                    expected,
                    "severity={} threshold={}",
                    severity,
                    threshold
                );
            }
        }
    }

    #[test]
    fn test_info_threshold_is_most_verbose() {
        assert!(Severity::Error.passes(Severity::Info));
        assert!(Severity::Info.passes(Severity::Info));
        assert!(!Severity::Info.passes(Severity::Error));
    }

    #[test]
    fn test_silent_has_no_tag() {
        assert!(matches!(
            Severity::Silent.tag(),
            Err(LogError::InvalidSeverity(0))
        ));
    }

    #[test]
    fn test_padded_tags_share_a_column() {
        assert_eq!(Severity::Info.padded_tag().unwrap(), "[info]       ");
        assert_eq!(Severity::Warning.padded_tag().unwrap(), "[warn]       ");
        assert_eq!(Severity::Error.padded_tag().unwrap(), "[error]      ");
    }

    #[test]
    fn test_try_from_rejects_unknown_rank() {
        assert_eq!(Severity::try_from(2).unwrap(), Severity::Warning);
        assert!(matches!(
            Severity::try_from(9),
            Err(LogError::InvalidSeverity(9))
        ));
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("none".parse::<Severity>().unwrap(), Severity::Silent);
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(" info ".parse::<Severity>().unwrap(), Severity::Info);
        assert!("debug".parse::<Severity>().is_err());
    }
}
