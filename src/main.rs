//! swcache - A cache-first resource worker for a single-page site
//!
//! swcache provides:
//! - Pre-population of a versioned cache generation at install time
//! - Cleanup of stale generations on activation
//! - Cache-first serving for static assets, network-first for audio
//! - A CLEAR_CACHE control message
//! - Unified output format (jsonl/json/md/raw)

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cli;
mod config;
mod core;
mod host;
mod policy;
mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    cli::run(cli).await
}
