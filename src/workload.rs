//! Stand-in workload each rank runs between `start` and `stop`.
//!
//! Only the `Log` trait is visible here, the same as for real compute code.

use ranklog_core::{Log, LogResult, Severity};

/// Log `steps` progress lines and one summary line.
pub fn run(log: &dyn Log, rank: usize, steps: usize) -> LogResult<()> {
    for step in 0..steps {
        if log.enabled(Severity::Info) {
            log.log(Severity::Info, &format!("rank {} step {}", rank, step))?;
        }
    }
    log.log(
        Severity::Warning,
        &format!("rank {} finished {} steps", rank, steps),
    )
}
