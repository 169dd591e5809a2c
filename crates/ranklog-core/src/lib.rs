//! ranklog core library
//!
//! Level-filtered logging for a group of cooperating processes, with one
//! designated process writing the only log file.
//!
//! ## Overview
//!
//! - [`Logger`]: process-local threshold gate plus the append-only writer
//! - [`Collector`]: runs a `Logger` across a group; rank 0 (the sink) owns
//!   the file, every other rank forwards its records to it
//! - [`GroupContext`]: barrier plus log channel; [`LocalGroup`] for ranks
//!   inside one process, [`TcpGroup`] for ranks in separate processes
//!
//! Workload code depends only on the [`Log`] trait and never needs to know
//! whether it runs inside a group.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ranklog_core::{Collector, GroupConfig, Log, LogConfig, Logger, Severity, TcpGroup};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = Arc::new(Logger::configure(LogConfig::new("run.log", Severity::Info))?);
//!     let group = TcpGroup::connect(GroupConfig::new(rank, size, "127.0.0.1:7450".parse()?)).await?;
//!
//!     let collector = Collector::new(logger, Arc::new(group));
//!     collector.start().await?;
//!     collector.log(Severity::Info, "training started")?;
//!     collector.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod group;
pub mod logger;
pub mod record;
pub mod severity;
pub mod transport;
pub mod writer;

// Re-exports
pub use collector::Collector;
pub use config::LogConfig;
pub use error::{LogError, LogResult};
pub use group::{Envelope, GroupContext, LocalGroup, LogInbox, LogOutbox, SINK_RANK};
pub use logger::{Log, Logger};
pub use record::{format_line, LogRecord, Origin, Rank, WireRecord};
pub use severity::Severity;
pub use transport::{Frame, GroupConfig, SinkAcceptor, TcpGroup};
pub use writer::LineWriter;
