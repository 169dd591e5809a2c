//! TCP group transport.
//!
//! Rank 0 listens; every other rank opens one connection to it. Each
//! connection carries length-delimited postcard frames:
//!
//! ```text
//! source                              sink
//!   │── Hello { rank, size } ──────────>│  admission (rank unique, in range)
//!   │── Log(record) ───────────────────>│  -> inbox, stamped with rank
//!   │── Arrive ────────────────────────>│  barrier bookkeeping
//!   │<───────────────────────── Release │  once every rank arrived
//! ```
//!
//! A source's outgoing frames share one queue drained by one writer task,
//! so `Log` frames always precede the `Arrive` that follows them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::error::{LogError, LogResult};
use crate::group::{Envelope, GroupContext, LogInbox, LogOutbox, SINK_RANK};
use crate::record::{Rank, WireRecord};

/// Default time a source keeps retrying to reach the sink.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between connection attempts.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// One unit on a group connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame from a source
    Hello { rank: Rank, size: usize },
    /// A gated record for the sink
    Log(WireRecord),
    /// Source reached a barrier
    Arrive,
    /// Sink releases a barrier
    Release,
}

impl Frame {
    pub fn encode(&self) -> LogResult<Bytes> {
        Ok(Bytes::from(postcard::to_allocvec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> LogResult<Self> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Where this process sits in a TCP group.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub rank: Rank,
    pub size: usize,
    /// Address the sink listens on and sources connect to
    pub sink_addr: SocketAddr,
    /// Sink: time to admit all sources. Source: time to reach the sink.
    pub connect_timeout: Duration,
    /// Upper bound on a single barrier; `None` waits forever.
    ///
    /// A barrier that times out leaves the group unusable: every later
    /// barrier on that rank fails at once.
    pub barrier_timeout: Option<Duration>,
}

impl GroupConfig {
    pub fn new(rank: Rank, size: usize, sink_addr: SocketAddr) -> Self {
        Self {
            rank,
            size,
            sink_addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            barrier_timeout: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = Some(timeout);
        self
    }

    fn check(&self) -> LogResult<()> {
        if self.size == 0 || self.rank >= self.size {
            return Err(LogError::Transport(format!(
                "rank {} outside a group of {}",
                self.rank, self.size
            )));
        }
        Ok(())
    }
}

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// What the sink learns from its peers' reader tasks
#[derive(Debug)]
enum PeerEvent {
    Arrived(Rank),
    Closed(Rank),
}

struct SinkBarrier {
    events: mpsc::UnboundedReceiver<PeerEvent>,
    departed: Vec<bool>,
}

enum Side {
    Sink {
        peers: Vec<mpsc::UnboundedSender<Frame>>,
        barrier: tokio::sync::Mutex<SinkBarrier>,
        inbox_tx: mpsc::UnboundedSender<Envelope>,
        inbox: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    },
    Source {
        outgoing: mpsc::UnboundedSender<Frame>,
        releases: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
    },
}

/// A group whose ranks are separate processes talking TCP.
///
/// After a barrier timeout the arrivals and releases of that round are out
/// of step with the other ranks, so the group refuses further barriers.
pub struct TcpGroup {
    rank: Rank,
    size: usize,
    barrier_timeout: Option<Duration>,
    /// Set once a barrier timed out
    broken: AtomicBool,
    side: Side,
    tasks: Vec<JoinHandle<()>>,
}

/// Sink listener bound ahead of admitting the group.
///
/// Binding separately lets callers learn the real port (e.g. when binding
/// port 0) before sources are started.
pub struct SinkAcceptor {
    listener: TcpListener,
}

impl SinkAcceptor {
    pub async fn bind(addr: SocketAddr) -> LogResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LogError::Transport(format!("failed to bind {}: {}", addr, e)))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> LogResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Admit `size - 1` sources and build the sink's group handle.
    pub async fn accept_group(
        self,
        size: usize,
        connect_timeout: Duration,
        barrier_timeout: Option<Duration>,
    ) -> LogResult<TcpGroup> {
        if size == 0 {
            return Err(LogError::Transport("group size must be at least 1".into()));
        }

        let mut admission = Admission::new(size);
        let mut streams = Vec::with_capacity(size - 1);

        let accept_all = async {
            while streams.len() < size - 1 {
                let (stream, addr) = self.listener.accept().await?;
                stream.set_nodelay(true)?;
                let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

                let hello = match framed.next().await {
                    Some(Ok(bytes)) => Frame::decode(&bytes),
                    Some(Err(e)) => Err(e.into()),
                    None => Err(LogError::Transport("closed before hello".into())),
                };
                match hello.and_then(|frame| admission.admit(&frame)) {
                    Ok(rank) => {
                        debug!(%addr, rank, "Admitted group member");
                        streams.push((rank, framed));
                    }
                    Err(e) => warn!(%addr, error = %e, "Rejected group connection"),
                }
            }
            Ok::<_, LogError>(())
        };

        let accepted = tokio::time::timeout(connect_timeout, accept_all).await;
        match accepted {
            Ok(result) => result?,
            Err(_) => {
                return Err(LogError::Transport(format!(
                    "timed out waiting for {} of {} ranks",
                    size - 1 - streams.len(),
                    size - 1
                )))
            }
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let mut peers = Vec::with_capacity(streams.len());
        let mut tasks = Vec::with_capacity(streams.len() * 2);

        for (rank, framed) in streams {
            let (frame_tx, frame_rx) = mpsc::unbounded_channel();
            let (sink, stream) = framed.split();
            tasks.push(tokio::spawn(write_frames(sink, frame_rx)));
            tasks.push(tokio::spawn(read_from_source(
                rank,
                stream,
                inbox_tx.clone(),
                event_tx.clone(),
            )));
            peers.push(frame_tx);
        }

        info!(size, "Sink admitted all ranks");
        Ok(TcpGroup {
            rank: SINK_RANK,
            size,
            barrier_timeout,
            broken: AtomicBool::new(false),
            side: Side::Sink {
                peers,
                barrier: tokio::sync::Mutex::new(SinkBarrier {
                    events: event_rx,
                    departed: vec![false; size],
                }),
                inbox_tx,
                inbox: Mutex::new(Some(inbox_rx)),
            },
            tasks,
        })
    }
}

impl TcpGroup {
    /// Join the group described by `config`.
    ///
    /// Rank 0 binds `sink_addr` and waits for every other rank; the others
    /// retry connecting until `connect_timeout` runs out.
    pub async fn connect(config: GroupConfig) -> LogResult<Self> {
        config.check()?;
        if config.rank == SINK_RANK {
            SinkAcceptor::bind(config.sink_addr)
                .await?
                .accept_group(config.size, config.connect_timeout, config.barrier_timeout)
                .await
        } else {
            Self::connect_source(config).await
        }
    }

    async fn connect_source(config: GroupConfig) -> LogResult<Self> {
        let deadline = Instant::now() + config.connect_timeout;
        let stream = loop {
            match TcpStream::connect(config.sink_addr).await {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    debug!(addr = %config.sink_addr, error = %e, "Sink not reachable yet");
                    tokio::time::sleep(CONNECT_RETRY).await;
                }
                Err(e) => {
                    return Err(LogError::Transport(format!(
                        "could not reach sink at {}: {}",
                        config.sink_addr, e
                    )))
                }
            }
        };
        stream.set_nodelay(true)?;

        let (sink, stream) = Framed::new(stream, LengthDelimitedCodec::new()).split();
        let (outgoing, frame_rx) = mpsc::unbounded_channel();
        let (release_tx, releases) = mpsc::unbounded_channel();

        // Queued first, so the writer always leads with it.
        let _ = outgoing.send(Frame::Hello {
            rank: config.rank,
            size: config.size,
        });

        let tasks = vec![
            tokio::spawn(write_frames(sink, frame_rx)),
            tokio::spawn(read_from_sink(config.rank, stream, release_tx)),
        ];

        info!(rank = config.rank, sink = %config.sink_addr, "Connected to sink");
        Ok(Self {
            rank: config.rank,
            size: config.size,
            barrier_timeout: config.barrier_timeout,
            broken: AtomicBool::new(false),
            side: Side::Source {
                outgoing,
                releases: tokio::sync::Mutex::new(releases),
            },
            tasks,
        })
    }

    async fn barrier_inner(&self) -> LogResult<()> {
        match &self.side {
            Side::Source { outgoing, releases } => {
                outgoing
                    .send(Frame::Arrive)
                    .map_err(|_| LogError::Transport("connection to sink closed".into()))?;
                releases
                    .lock()
                    .await
                    .recv()
                    .await
                    .ok_or_else(|| LogError::Transport("sink closed before release".into()))
            }
            Side::Sink { peers, barrier, .. } => {
                let mut state = barrier.lock().await;
                let mut arrived = vec![false; self.size];
                arrived[SINK_RANK] = true;

                if let Some(rank) = state.departed.iter().position(|gone| *gone) {
                    return Err(LogError::Transport(format!("rank {} has left the group", rank)));
                }

                let mut pending = self.size - 1;
                while pending > 0 {
                    match state.events.recv().await {
                        Some(PeerEvent::Arrived(rank)) if !arrived[rank] => {
                            arrived[rank] = true;
                            pending -= 1;
                        }
                        Some(PeerEvent::Arrived(rank)) => {
                            warn!(rank, "Duplicate barrier arrival");
                        }
                        Some(PeerEvent::Closed(rank)) => {
                            state.departed[rank] = true;
                            if !arrived[rank] {
                                return Err(LogError::Transport(format!(
                                    "rank {} disconnected before the barrier",
                                    rank
                                )));
                            }
                        }
                        None => {
                            return Err(LogError::Transport("all ranks disconnected".into()))
                        }
                    }
                }

                for peer in peers {
                    let _ = peer.send(Frame::Release);
                }
                Ok(())
            }
        }
    }
}

impl GroupContext for TcpGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn barrier(&self) -> LogResult<()> {
        if self.broken.load(Ordering::Acquire) {
            return Err(LogError::Transport(
                "group unusable after a barrier timeout".into(),
            ));
        }
        debug!(rank = self.rank, "Entering barrier");
        match self.barrier_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.barrier_inner()).await {
                Ok(result) => result,
                Err(_) => {
                    self.broken.store(true, Ordering::Release);
                    warn!(rank = self.rank, ?limit, "Barrier timed out, group is unusable");
                    Err(LogError::Transport(format!("barrier timed out after {:?}", limit)))
                }
            },
            None => self.barrier_inner().await,
        }
    }

    fn outbox(&self) -> LogResult<LogOutbox> {
        Ok(match &self.side {
            Side::Source { outgoing, .. } => LogOutbox::framed(self.rank, outgoing.clone()),
            Side::Sink { inbox_tx, .. } => LogOutbox::direct(self.rank, inbox_tx.clone()),
        })
    }

    fn take_inbox(&self) -> LogResult<LogInbox> {
        match &self.side {
            Side::Sink { inbox, .. } => inbox
                .lock()
                .take()
                .map(LogInbox::new)
                .ok_or_else(|| LogError::misuse("log inbox already taken")),
            Side::Source { .. } => Err(LogError::misuse(format!(
                "rank {} is not the sink and has no inbox",
                self.rank
            ))),
        }
    }
}

impl Drop for TcpGroup {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TcpGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpGroup")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

/// Sink-side bookkeeping of which ranks have said hello
struct Admission {
    size: usize,
    seen: Vec<bool>,
}

impl Admission {
    fn new(size: usize) -> Self {
        Self {
            size,
            seen: vec![false; size],
        }
    }

    fn admit(&mut self, frame: &Frame) -> LogResult<Rank> {
        let (rank, size) = match frame {
            Frame::Hello { rank, size } => (*rank, *size),
            other => {
                return Err(LogError::Transport(format!(
                    "expected hello, got {:?}",
                    other
                )))
            }
        };
        if size != self.size {
            return Err(LogError::Transport(format!(
                "rank {} believes the group has {} ranks, not {}",
                rank, size, self.size
            )));
        }
        if rank == SINK_RANK || rank >= self.size {
            return Err(LogError::Transport(format!("rank {} is not a source rank", rank)));
        }
        if std::mem::replace(&mut self.seen[rank], true) {
            return Err(LogError::Transport(format!("rank {} already joined", rank)));
        }
        Ok(rank)
    }
}

async fn write_frames(
    mut sink: futures::stream::SplitSink<FramedStream, Bytes>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = frames.recv().await {
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = sink.send(bytes).await {
            debug!(error = %e, "Group connection closed for writing");
            break;
        }
    }
}

async fn read_from_source(
    rank: Rank,
    mut stream: futures::stream::SplitStream<FramedStream>,
    inbox: mpsc::UnboundedSender<Envelope>,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    while let Some(item) = stream.next().await {
        let frame = match item.map_err(LogError::from).and_then(|b| Frame::decode(&b)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(rank, error = %e, "Bad frame from rank");
                break;
            }
        };
        match frame {
            Frame::Log(record) => {
                let _ = inbox.send(Envelope { from: rank, record });
            }
            Frame::Arrive => {
                let _ = events.send(PeerEvent::Arrived(rank));
            }
            other => warn!(rank, frame = ?other, "Unexpected frame from source"),
        }
    }
    debug!(rank, "Source connection closed");
    let _ = events.send(PeerEvent::Closed(rank));
}

async fn read_from_sink(
    rank: Rank,
    mut stream: futures::stream::SplitStream<FramedStream>,
    releases: mpsc::UnboundedSender<()>,
) {
    while let Some(item) = stream.next().await {
        match item.map_err(LogError::from).and_then(|b| Frame::decode(&b)) {
            Ok(Frame::Release) => {
                let _ = releases.send(());
            }
            Ok(other) => warn!(rank, frame = ?other, "Unexpected frame from sink"),
            Err(e) => {
                warn!(rank, error = %e, "Bad frame from sink");
                break;
            }
        }
    }
    debug!(rank, "Sink connection closed");
}
