//! Event API - records ENTRY/EXIT events in SQLite

use anyhow::Context;
use clap::Parser;
use presence_monitor::infra::{logging, Config};
use presence_monitor::io::{start_event_api, ApiState, EventStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "event-api", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!(git_hash = env!("GIT_HASH"), "event-api starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    let addr: SocketAddr = format!("{}:{}", config.api_bind_address(), config.api_port())
        .parse()
        .context("invalid event_api bind address")?;
    info!(
        config_file = %config.config_file(),
        addr = %addr,
        database = %config.database_path(),
        "config_loaded"
    );

    let store = Arc::new(EventStore::open(config.database_path())?);
    info!(rows = %store.count()?, "event_store_opened");
    let state = Arc::new(ApiState::new(store, config.viewer_port()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    start_event_api(addr, state, shutdown_rx).await?;

    info!("event-api shutdown complete");
    Ok(())
}
