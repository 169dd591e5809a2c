//! Spawn a TCP group as child processes of this executable.

use std::net::SocketAddr;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

use crate::OutputArgs;

/// Start `ranks` copies of `ranklog run` and wait for all of them.
pub async fn launch_group(
    ranks: usize,
    sink: SocketAddr,
    output: &OutputArgs,
    verbosity: u8,
) -> Result<()> {
    if ranks == 0 {
        anyhow::bail!("--ranks must be at least 1");
    }
    let binary = std::env::current_exe().context("Failed to locate ranklog executable")?;
    let config = output.log_config();

    let mut children = Vec::with_capacity(ranks);
    for rank in 0..ranks {
        let mut cmd = Command::new(&binary);
        cmd.arg("run")
            .arg("--rank")
            .arg(rank.to_string())
            .arg("--size")
            .arg(ranks.to_string())
            .arg("--sink")
            .arg(sink.to_string())
            .arg("--output")
            .arg(&config.output_path)
            .arg("--level")
            .arg(config.threshold.to_string())
            .arg("--messages")
            .arg(output.messages.to_string());

        if verbosity > 0 {
            cmd.arg(format!("-{}", "v".repeat(verbosity as usize)));
        }

        // Inherit RUST_LOG for consistent diagnostics
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            cmd.env("RUST_LOG", rust_log);
        }

        // Only rank 0 has anything to report
        if rank != 0 {
            cmd.stdout(Stdio::null());
        }

        tracing::debug!(rank, binary = %binary.display(), "Spawning rank process");
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn rank {}", rank))?;
        children.push((rank, child));
    }

    let mut failed = Vec::new();
    for (rank, mut child) in children {
        let status = child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for rank {}", rank))?;
        if !status.success() {
            tracing::warn!(rank, %status, "Rank exited with failure");
            failed.push(rank);
        }
    }

    if !failed.is_empty() {
        anyhow::bail!("Ranks {:?} failed", failed);
    }
    Ok(())
}
