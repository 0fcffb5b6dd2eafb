//! Offload agent entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Queues files for upload and drains the queue whenever the remote is reachable.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Files to enqueue before draining.
    pub files: Vec<PathBuf>,

    /// Destination metadata attached to every enqueued file (KEY=VALUE).
    #[arg(short, long = "tag", value_parser = app::parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Configuration file.
    #[arg(short, long, env = "OFFLOAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rearm failed items before draining.
    #[arg(long)]
    pub retry_failed: bool,

    /// Exit once nothing is left to attempt instead of running until Ctrl-C.
    #[arg(long)]
    pub exit_when_idle: bool,

    /// Print queue counts and exit.
    #[arg(long)]
    pub status: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting offload agent");

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(endpoint = %config.endpoint, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli))?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}
