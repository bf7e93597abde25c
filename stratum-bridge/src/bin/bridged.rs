//! Main entry point for the bridge daemon.

use clap::Parser;

use stratum_bridge::{config::Config, daemon::Daemon, tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    tracing::init_daemon();

    Daemon::new(config).run().await
}
