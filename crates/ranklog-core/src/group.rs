//! Group context: the set of cooperating ranks a collector runs across.
//!
//! Rank 0 is the sink; every other rank is a source. A context provides a
//! barrier and the two ends of the log channel:
//!
//! - [`LogOutbox`] (sources): fire-and-forget sender stamped with the rank
//! - [`LogInbox`] (sink): receiver of every source's records, taken once
//!
//! A source's log sends and its barrier arrival reach the sink in FIFO
//! order, so once the sink is through a barrier every record sent before
//! that barrier is already queued in its inbox.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Barrier};

use crate::error::{LogError, LogResult};
use crate::record::{Rank, WireRecord};
use crate::transport::Frame;

/// Rank that owns the output file.
pub const SINK_RANK: Rank = 0;

/// A record as received by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Rank,
    pub record: WireRecord,
}

/// Participation in a fixed group of ranks.
pub trait GroupContext: Send + Sync + 'static {
    /// This process' rank.
    fn rank(&self) -> Rank;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Whether this rank owns the output file.
    fn is_sink(&self) -> bool {
        self.rank() == SINK_RANK
    }

    /// Block until every rank has called `barrier`.
    fn barrier(&self) -> impl Future<Output = LogResult<()>> + Send;

    /// Sender toward the sink. Only meaningful on sources.
    fn outbox(&self) -> LogResult<LogOutbox>;

    /// Receiver of all source records. Sink only, can be taken once.
    fn take_inbox(&self) -> LogResult<LogInbox>;
}

#[derive(Debug, Clone)]
enum Route {
    /// In-process: straight into the sink's inbox
    Direct(mpsc::UnboundedSender<Envelope>),
    /// Networked: onto the ordered outgoing frame queue
    Framed(mpsc::UnboundedSender<Frame>),
}

/// Fire-and-forget sender of records to the sink.
#[derive(Debug, Clone)]
pub struct LogOutbox {
    from: Rank,
    route: Route,
}

impl LogOutbox {
    pub(crate) fn direct(from: Rank, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            from,
            route: Route::Direct(tx),
        }
    }

    pub(crate) fn framed(from: Rank, tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            from,
            route: Route::Framed(tx),
        }
    }

    /// Rank stamped on outgoing records.
    pub fn rank(&self) -> Rank {
        self.from
    }

    /// Queue a record for the sink without waiting.
    ///
    /// Returns `false` if the sink side is already gone; the record is
    /// dropped, which is not an error for the sender.
    pub fn send(&self, record: WireRecord) -> bool {
        match &self.route {
            Route::Direct(tx) => tx
                .send(Envelope {
                    from: self.from,
                    record,
                })
                .is_ok(),
            Route::Framed(tx) => tx.send(Frame::Log(record)).is_ok(),
        }
    }
}

/// Receiving end of the log channel, owned by the sink's listener.
#[derive(Debug)]
pub struct LogInbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl LogInbox {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { rx }
    }

    /// Wait for the next record. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Next record if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

struct LocalShared {
    size: usize,
    barrier: Barrier,
    hub: mpsc::UnboundedSender<Envelope>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
}

/// In-process group: each rank is a task or thread of the same process.
///
/// Used for tests and single-host runs where ranks are tasks.
#[derive(Clone)]
pub struct LocalGroup {
    rank: Rank,
    shared: Arc<LocalShared>,
}

impl LocalGroup {
    /// Create handles for a group of `size` ranks, indexed by rank.
    pub fn new(size: usize) -> Vec<LocalGroup> {
        let (hub, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LocalShared {
            size,
            barrier: Barrier::new(size),
            hub,
            inbox: Mutex::new(Some(rx)),
        });

        (0..size)
            .map(|rank| LocalGroup {
                rank,
                shared: shared.clone(),
            })
            .collect()
    }
}

impl GroupContext for LocalGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    async fn barrier(&self) -> LogResult<()> {
        self.shared.barrier.wait().await;
        Ok(())
    }

    fn outbox(&self) -> LogResult<LogOutbox> {
        Ok(LogOutbox::direct(self.rank, self.shared.hub.clone()))
    }

    fn take_inbox(&self) -> LogResult<LogInbox> {
        if !self.is_sink() {
            return Err(LogError::misuse(format!(
                "rank {} is not the sink and has no inbox",
                self.rank
            )));
        }
        self.shared
            .inbox
            .lock()
            .take()
            .map(LogInbox::new)
            .ok_or_else(|| LogError::misuse("log inbox already taken"))
    }
}

impl std::fmt::Debug for LocalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGroup")
            .field("rank", &self.rank)
            .field("size", &self.shared.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;

    fn wire(message: &str) -> WireRecord {
        WireRecord {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    #[test]
    fn test_local_group_ranks() {
        let group = LocalGroup::new(3);
        assert_eq!(group.len(), 3);
        for (i, member) in group.iter().enumerate() {
            assert_eq!(member.rank(), i);
            assert_eq!(member.size(), 3);
        }
        assert!(group[0].is_sink());
        assert!(!group[2].is_sink());
    }

    #[test]
    fn test_inbox_taken_once_by_sink_only() {
        let group = LocalGroup::new(2);
        assert!(matches!(
            group[1].take_inbox(),
            Err(LogError::LifecycleMisuse(_))
        ));
        assert!(group[0].take_inbox().is_ok());
        assert!(matches!(
            group[0].take_inbox(),
            Err(LogError::LifecycleMisuse(_))
        ));
    }

    #[tokio::test]
    async fn test_outbox_stamps_rank() {
        let group = LocalGroup::new(3);
        let mut inbox = group[0].take_inbox().unwrap();

        assert!(group[2].outbox().unwrap().send(wire("a")));
        assert!(group[1].outbox().unwrap().send(wire("b")));

        let first = inbox.recv().await.unwrap();
        let second = inbox.recv().await.unwrap();
        assert_eq!((first.from, first.record.message.as_str()), (2, "a"));
        assert_eq!((second.from, second.record.message.as_str()), (1, "b"));
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_send_after_inbox_dropped_is_silent() {
        let group = LocalGroup::new(2);
        let inbox = group[0].take_inbox().unwrap();
        drop(inbox);

        assert!(!group[1].outbox().unwrap().send(wire("late")));
    }

    #[tokio::test]
    async fn test_barrier_releases_all_ranks() {
        let group = LocalGroup::new(4);
        let handles: Vec<_> = group
            .into_iter()
            .map(|member| tokio::spawn(async move { member.barrier().await }))
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
