//! peerlink command-line entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,peerlink=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting peerlink");

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(download_dir = %config.download_dir.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli, config))?;

    tracing::info!("peerlink shut down cleanly");
    Ok(())
}
