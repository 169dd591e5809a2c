//! ranklog CLI
//!
//! Thin wrapper around ranklog-core for running a logging group by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Four ranks as tasks of this process
//! ranklog demo --ranks 4 --level info --output run.log
//!
//! # One rank of a TCP group (start one process per rank)
//! ranklog run --rank 0 --size 3 --sink 127.0.0.1:7450 --level info
//! ranklog run --rank 1 --size 3 --sink 127.0.0.1:7450 --level info
//!
//! # Spawn a whole TCP group as child processes and wait for it
//! ranklog launch --ranks 3 --level warn --output run.log
//! ```

mod launch;
mod workload;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ranklog_core::{
    Collector, GroupConfig, GroupContext, LocalGroup, LogConfig, LogError, Logger, Severity,
    TcpGroup,
};

/// Default sink address for TCP groups
const DEFAULT_SINK: &str = "127.0.0.1:7450";

/// ranklog - one log file for a group of worker processes
#[derive(Parser)]
#[command(name = "ranklog")]
#[command(version = "0.1.0")]
#[command(about = "ranklog - one log file for a group of worker processes")]
struct Cli {
    /// Increase verbosity of ranklog's own diagnostics (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a group of ranks as tasks inside this process
    Demo {
        /// Number of ranks (rank 0 writes the file)
        #[arg(short, long, default_value_t = 4)]
        ranks: usize,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run one rank of a TCP group
    Run {
        /// This process' rank
        #[arg(long)]
        rank: usize,

        /// Number of ranks in the group
        #[arg(long)]
        size: usize,

        /// Address rank 0 listens on
        #[arg(long, default_value = DEFAULT_SINK)]
        sink: SocketAddr,

        /// Seconds to wait for the group to assemble
        #[arg(long, default_value_t = 10)]
        connect_timeout: u64,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Spawn a TCP group as child processes and wait for all of them
    Launch {
        /// Number of ranks to spawn
        #[arg(short, long, default_value_t = 4)]
        ranks: usize,

        /// Address rank 0 listens on
        #[arg(long, default_value = DEFAULT_SINK)]
        sink: SocketAddr,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args, Clone, Debug)]
struct OutputArgs {
    /// Log file written by rank 0 [default: $RANKLOG_OUTPUT or <tmp>/ranklog.log]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Threshold: none, error, warn or info [default: $RANKLOG_LEVEL or none]
    #[arg(short, long)]
    level: Option<Severity>,

    /// Work steps each rank logs
    #[arg(short, long, default_value_t = 10)]
    messages: usize,
}

impl OutputArgs {
    /// Environment-backed defaults overridden by flags.
    fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::from_env();
        if let Some(path) = &self.output {
            config = config.with_output(path);
        }
        if let Some(level) = self.level {
            config = config.with_threshold(level);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Demo { ranks, output } => run_demo(ranks, &output).await,
        Commands::Run {
            rank,
            size,
            sink,
            connect_timeout,
            output,
        } => {
            let group = GroupConfig::new(rank, size, sink)
                .with_connect_timeout(Duration::from_secs(connect_timeout));
            run_rank(group, &output).await
        }
        Commands::Launch {
            ranks,
            sink,
            output,
        } => launch::launch_group(ranks, sink, &output, cli.verbose).await,
    }
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

async fn run_demo(ranks: usize, output: &OutputArgs) -> Result<()> {
    if ranks == 0 {
        anyhow::bail!("--ranks must be at least 1");
    }
    let config = output.log_config();
    let path = config.output_path.clone();

    let mut handles = Vec::with_capacity(ranks);
    for member in LocalGroup::new(ranks) {
        let logger = Logger::configure(config.clone()).context("Invalid log output")?;
        let collector = Collector::new(Arc::new(logger), Arc::new(member));
        let steps = output.messages;
        handles.push(tokio::spawn(async move {
            collector.start().await?;
            workload::run(&collector, collector.group().rank(), steps)?;
            collector.stop().await?;
            Ok::<_, LogError>(collector.group().is_sink().then(|| collector.relayed()))
        }));
    }

    let mut relayed = 0;
    for (rank, handle) in handles.into_iter().enumerate() {
        let result = handle
            .await
            .with_context(|| format!("Rank {} panicked", rank))?
            .with_context(|| format!("Rank {} failed", rank))?;
        relayed += result.unwrap_or(0);
    }

    println!("Demo finished: {} ranks", ranks);
    println!("  Relayed lines: {}", relayed);
    println!("  Log file: {}", path.display());
    Ok(())
}

async fn run_rank(group: GroupConfig, output: &OutputArgs) -> Result<()> {
    let config = output.log_config();
    let path = config.output_path.clone();
    let logger = Logger::configure(config).context("Invalid log output")?;

    let rank = group.rank;
    let group = TcpGroup::connect(group)
        .await
        .with_context(|| format!("Rank {} could not join the group", rank))?;
    let collector = Collector::new(Arc::new(logger), Arc::new(group));

    collector.start().await.context("Failed to start collector")?;
    workload::run(&collector, rank, output.messages).context("Workload logging failed")?;
    collector.stop().await.context("Failed to stop collector")?;

    if collector.group().is_sink() {
        println!("Rank 0 finished");
        println!("  Relayed lines: {}", collector.relayed());
        println!("  Log file: {}", path.display());
    }
    Ok(())
}
