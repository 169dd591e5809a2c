//! Property-based tests for the threshold gate and line format
//!
//! Uses proptest to check the gate against the written file.

use proptest::prelude::*;
use ranklog_core::{format_line, Log, LogConfig, Logger, Origin, Severity};
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop::sample::select(Severity::ALL.to_vec())
}

/// Single-line, non-empty payloads
fn message_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 .,:_-]{1,80}").expect("valid regex")
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// A line is written iff threshold != Silent, severity != Silent and rank(s) <= rank(t)
    #[test]
    fn log_writes_iff_gate_passes(
        threshold in severity_strategy(),
        severity in severity_strategy(),
        message in message_strategy(),
    ) {
        let temp = TempDir::new().unwrap();
        let logger = Logger::configure(LogConfig::new(temp.path().join("run.log"), threshold)).unwrap();

        logger.log(severity, &message).unwrap();

        let written = std::fs::read_to_string(logger.output_path()).unwrap_or_default();
        let expected = threshold != Severity::Silent
            && severity != Severity::Silent
            && severity.rank() <= threshold.rank();

        if expected {
            let line = format_line(Origin::Local, severity, &message).unwrap();
            prop_assert_eq!(written, format!("{}\n", line));
        } else {
            prop_assert!(written.is_empty());
        }
    }

    /// The message is always the suffix after the fixed tag column
    #[test]
    fn formatted_line_ends_with_message(
        rank in 0usize..64,
        severity in prop::sample::select(vec![Severity::Error, Severity::Warning, Severity::Info]),
        message in message_strategy(),
    ) {
        let line = format_line(Origin::Rank(rank), severity, &message).unwrap();
        let prefix = format!("P{} - ", rank);
        prop_assert!(line.starts_with(&prefix));
        prop_assert_eq!(&line[prefix.len() + 13..], message.as_str());
    }

    /// Per-source order is file order for a single writer
    #[test]
    fn sequential_writes_keep_order(messages in prop::collection::vec(message_strategy(), 1..40)) {
        let temp = TempDir::new().unwrap();
        let logger = Logger::configure(LogConfig::new(temp.path().join("run.log"), Severity::Info)).unwrap();

        for message in &messages {
            logger.log(Severity::Info, message).unwrap();
        }

        let content = std::fs::read_to_string(logger.output_path()).unwrap();
        let payloads: Vec<_> = content.lines().map(|l| l[8 + 13..].to_string()).collect();
        prop_assert_eq!(payloads, messages);
    }
}
