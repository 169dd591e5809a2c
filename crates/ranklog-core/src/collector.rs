//! Distributed log collector.
//!
//! The `Collector` makes a [`Logger`] usable across a group of ranks with
//! exactly one rank (the sink, rank 0) touching the output file. Sources
//! forward their records over the group's log channel; the sink runs a
//! background listener that writes them as they arrive.
//!
//! ## Lifecycle
//!
//! ```text
//!            start()              stop()
//!  Idle ──(barrier #1)──> Running ──(flag cleared)──> Draining ──(barrier #2)──> Stopped
//!                           │                                        │
//!                           └─ sink: listener task spawned           └─ sink: cancel + join listener
//! ```
//!
//! Every rank must call both `start` and `stop`. Because a source's sends
//! and its barrier arrival travel in order, the sink holds every record sent
//! before `stop` once it leaves the second barrier; the listener drains them
//! before it exits and `stop` returns.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{LogError, LogResult};
use crate::group::{Envelope, GroupContext, LogInbox, LogOutbox};
use crate::logger::{Log, Logger};
use crate::record::{Origin, WireRecord};
use crate::severity::Severity;

/// What this rank does while running
enum Role {
    Sink,
    Source(LogOutbox),
}

enum Phase {
    Idle,
    Running(Role),
    Draining,
    Stopped,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running(_) => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        }
    }
}

/// Background listener on the sink
struct Listener {
    cancel: CancellationToken,
    task: JoinHandle<LogResult<u64>>,
}

/// Group-aware front end of a [`Logger`].
pub struct Collector<G: GroupContext> {
    logger: Arc<Logger>,
    group: Arc<G>,
    phase: RwLock<Phase>,
    listener: Mutex<Option<Listener>>,
    /// Serializes start/stop across tasks of this process
    lifecycle: tokio::sync::Mutex<()>,
    /// Lines written on behalf of sources during the last run
    relayed: AtomicU64,
}

impl<G: GroupContext> Collector<G> {
    pub fn new(logger: Arc<Logger>, group: Arc<G>) -> Self {
        Self {
            logger,
            group,
            phase: RwLock::new(Phase::Idle),
            listener: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            relayed: AtomicU64::new(0),
        }
    }

    /// The wrapped process-local logger.
    pub fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    /// The group this collector runs across.
    pub fn group(&self) -> &Arc<G> {
        &self.group
    }

    /// Whether `start` has completed and `stop` has not begun.
    pub fn is_running(&self) -> bool {
        matches!(*self.phase.read(), Phase::Running(_))
    }

    /// Lines the sink wrote on behalf of sources (sink only, after `stop`).
    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Join the group run. Blocks until every rank has called `start`.
    ///
    /// Calling it again while running is a no-op.
    pub async fn start(&self) -> LogResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        match &*self.phase.read() {
            Phase::Idle => {}
            Phase::Running(_) => {
                debug!(rank = self.group.rank(), "Collector already running");
                return Ok(());
            }
            other => {
                return Err(LogError::misuse(format!(
                    "start called on a {} collector",
                    other.name()
                )))
            }
        }

        self.group.barrier().await?;

        let role = if self.group.is_sink() {
            if self.group.size() > 1 {
                let inbox = self.group.take_inbox()?;
                let cancel = CancellationToken::new();
                let task = tokio::spawn(listen(self.logger.clone(), inbox, cancel.clone()));
                *self.listener.lock() = Some(Listener { cancel, task });
            }
            Role::Sink
        } else {
            Role::Source(self.group.outbox()?)
        };

        *self.phase.write() = Phase::Running(role);
        self.relayed.store(0, Ordering::Relaxed);

        info!(
            rank = self.group.rank(),
            size = self.group.size(),
            sink = self.group.is_sink(),
            "Log collector started"
        );
        Ok(())
    }

    /// Leave the group run. Blocks until every rank has called `stop`.
    ///
    /// On the sink this returns only after every record sent before any
    /// rank's `stop` has been written. Calling it when not running is a no-op.
    pub async fn stop(&self) -> LogResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut phase = self.phase.write();
            if !matches!(*phase, Phase::Running(_)) {
                debug!(rank = self.group.rank(), phase = phase.name(), "Collector not running");
                return Ok(());
            }
            // Drops the outbox on sources; local log calls are refused from here on.
            *phase = Phase::Draining;
        }

        let barrier = self.group.barrier().await;

        let listener = self.listener.lock().take();
        let drained = match listener {
            Some(listener) => {
                listener.cancel.cancel();
                match listener.task.await {
                    Ok(result) => result,
                    Err(e) => Err(LogError::Transport(format!("log listener failed: {}", e))),
                }
            }
            None => Ok(0),
        };

        *self.phase.write() = Phase::Stopped;

        barrier?;
        let relayed = drained?;
        self.relayed.store(relayed, Ordering::Relaxed);
        if self.group.is_sink() {
            self.logger.flush()?;
        }

        info!(rank = self.group.rank(), relayed, "Log collector stopped");
        Ok(())
    }
}

impl<G: GroupContext> Log for Collector<G> {
    fn log(&self, severity: Severity, message: &str) -> LogResult<()> {
        let phase = self.phase.read();
        let role = match &*phase {
            Phase::Running(role) => role,
            Phase::Idle => return Err(LogError::misuse("log called before start")),
            Phase::Draining | Phase::Stopped => {
                return Err(LogError::misuse("log called after stop"))
            }
        };

        if message.is_empty() || !self.logger.enabled(severity) {
            return Ok(());
        }

        match role {
            Role::Sink => {
                self.logger
                    .log_from(Origin::Rank(self.group.rank()), severity, message)
            }
            Role::Source(outbox) => {
                // Reject what the sink could never format before it leaves this rank.
                severity.tag()?;
                if !outbox.send(WireRecord {
                    severity,
                    message: message.to_string(),
                }) {
                    debug!(rank = outbox.rank(), "Sink gone, dropping log record");
                }
                Ok(())
            }
        }
    }

    fn threshold(&self) -> Severity {
        self.logger.threshold()
    }

    fn output_path(&self) -> &Path {
        self.logger.output_path()
    }
}

impl<G: GroupContext> Drop for Collector<G> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
        }
    }
}

/// Sink listener: write records as they arrive until cancelled, then drain.
async fn listen(logger: Arc<Logger>, mut inbox: LogInbox, cancel: CancellationToken) -> LogResult<u64> {
    debug!("Log listener started");
    let mut written = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            envelope = inbox.recv() => match envelope {
                Some(envelope) => {
                    if deliver(&logger, envelope)? {
                        written += 1;
                    }
                }
                None => {
                    debug!(written, "All log senders closed");
                    return Ok(written);
                }
            },
        }
    }

    while let Some(envelope) = inbox.try_recv() {
        if deliver(&logger, envelope)? {
            written += 1;
        }
    }

    debug!(written, "Log listener drained");
    Ok(written)
}

/// Write one relayed record. Returns whether a line was written.
///
/// A record the sink cannot format is rejected on its own; only output
/// failures end the listener.
fn deliver(logger: &Logger, envelope: Envelope) -> LogResult<bool> {
    let Envelope { from, record } = envelope;
    if record.message.is_empty() {
        return Ok(false);
    }
    match logger.write_through(Origin::Rank(from), record.severity, &record.message) {
        Ok(()) => Ok(true),
        Err(LogError::InvalidSeverity(value)) => {
            warn!(from, severity = value, "Rejected relayed log record");
            Ok(false)
        }
        Err(e) => {
            error!(from, error = %e, "Failed to write relayed log record");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::group::LocalGroup;
    use std::fs;
    use tempfile::TempDir;

    fn collectors(temp: &TempDir, size: usize, threshold: Severity) -> Vec<Arc<Collector<LocalGroup>>> {
        let path = temp.path().join("run.log");
        LocalGroup::new(size)
            .into_iter()
            .map(|member| {
                let logger = Arc::new(Logger::configure(LogConfig::new(&path, threshold)).unwrap());
                Arc::new(Collector::new(logger, Arc::new(member)))
            })
            .collect()
    }

    async fn start_all(all: &[Arc<Collector<LocalGroup>>]) {
        let handles: Vec<_> = all
            .iter()
            .cloned()
            .map(|c| tokio::spawn(async move { c.start().await }))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    async fn stop_all(all: &[Arc<Collector<LocalGroup>>]) {
        let handles: Vec<_> = all
            .iter()
            .cloned()
            .map(|c| tokio::spawn(async move { c.stop().await }))
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .map(|c| c.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_log_before_start_is_misuse() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 2, Severity::Info);

        assert!(matches!(
            all[1].log(Severity::Info, "early"),
            Err(LogError::LifecycleMisuse(_))
        ));
    }

    #[tokio::test]
    async fn test_sink_writes_directly_with_its_rank() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 1, Severity::Info);

        all[0].start().await.unwrap();
        all[0].log(Severity::Info, "hello").unwrap();
        all[0].stop().await.unwrap();

        assert_eq!(
            read_lines(all[0].output_path()),
            vec!["P0 - [info]       hello"]
        );
    }

    #[tokio::test]
    async fn test_sources_are_relayed() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 3, Severity::Info);

        start_all(&all).await;
        all[1].log(Severity::Warning, "from one").unwrap();
        all[2].log(Severity::Error, "from two").unwrap();
        stop_all(&all).await;

        let mut lines = read_lines(all[0].output_path());
        lines.sort();
        assert_eq!(
            lines,
            vec!["P1 - [warn]       from one", "P2 - [error]      from two"]
        );
        assert_eq!(all[0].relayed(), 2);
    }

    #[tokio::test]
    async fn test_source_gate_applies_before_send() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 2, Severity::Warning);

        start_all(&all).await;
        all[1].log(Severity::Info, "x").unwrap();
        all[1].log(Severity::Warning, "y").unwrap();
        all[1].log(Severity::Error, "z").unwrap();
        stop_all(&all).await;

        assert_eq!(
            read_lines(all[0].output_path()),
            vec!["P1 - [warn]       y", "P1 - [error]      z"]
        );
        assert_eq!(all[0].relayed(), 2);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 1, Severity::Info);

        all[0].start().await.unwrap();
        all[0].start().await.unwrap();
        assert!(all[0].is_running());

        all[0].stop().await.unwrap();
        assert!(!all[0].is_running());
    }

    #[tokio::test]
    async fn test_sink_start_twice_still_relays() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 3, Severity::Info);

        start_all(&all).await;
        // No second barrier, no second inbox take, no second listener.
        all[0].start().await.unwrap();
        assert!(all[0].is_running());

        all[1].log(Severity::Info, "one").unwrap();
        all[2].log(Severity::Info, "two").unwrap();
        stop_all(&all).await;

        let mut lines = read_lines(all[0].output_path());
        lines.sort();
        assert_eq!(
            lines,
            vec!["P1 - [info]       one", "P2 - [info]       two"]
        );
        assert_eq!(all[0].relayed(), 2);
    }

    #[tokio::test]
    async fn test_invalid_relayed_record_is_skipped() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 3, Severity::Info);

        start_all(&all).await;
        // Bypasses the source-side check, as a misbehaving peer would.
        let outbox = all[1].group().outbox().unwrap();
        assert!(outbox.send(WireRecord {
            severity: Severity::Silent,
            message: "bad".to_string(),
        }));
        for i in 0..5 {
            all[2].log(Severity::Info, &format!("good {}", i)).unwrap();
        }
        stop_all(&all).await;

        let lines = read_lines(all[0].output_path());
        let expected: Vec<String> = (0..5)
            .map(|i| format!("P2 - [info]       good {}", i))
            .collect();
        assert_eq!(lines, expected);
        assert_eq!(all[0].relayed(), 5);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 2, Severity::Info);

        start_all(&all).await;
        stop_all(&all).await;
        // Second stop must not wait on a barrier.
        stop_all(&all).await;
    }

    #[tokio::test]
    async fn test_log_after_stop_is_misuse() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 2, Severity::Info);

        start_all(&all).await;
        stop_all(&all).await;

        for collector in &all {
            assert!(matches!(
                collector.log(Severity::Error, "late"),
                Err(LogError::LifecycleMisuse(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_misuse() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 1, Severity::Info);

        all[0].start().await.unwrap();
        all[0].stop().await.unwrap();
        assert!(matches!(
            all[0].start().await,
            Err(LogError::LifecycleMisuse(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_message_sends_nothing() {
        let temp = TempDir::new().unwrap();
        let all = collectors(&temp, 2, Severity::Info);

        start_all(&all).await;
        all[1].log(Severity::Info, "").unwrap();
        stop_all(&all).await;

        assert_eq!(all[0].relayed(), 0);
        assert!(!all[0].output_path().exists());
    }
}
