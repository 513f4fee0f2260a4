//! Presence monitor - launches and supervises the whole pipeline
//!
//! Starts the media relay, the ingest transcoder, the MJPEG viewer, the event
//! API and the occupancy monitor in order, then forwards Ctrl+C to all of them.
//!
//! Module structure:
//! - `domain/` - ROI, occupancy state machine, event types
//! - `io/` - External interfaces (ffmpeg, detector, HTTP servers, SQLite)
//! - `services/` - Monitor loop, overlay, event worker, supervisor
//! - `infra/` - Infrastructure (Config, Metrics, logging)

use clap::Parser;
use presence_monitor::infra::{logging, Config};
use presence_monitor::services::Supervisor;
use tokio::sync::watch;
use tracing::{error, info};

/// Presence monitor - pipeline supervisor
#[derive(Parser, Debug)]
#[command(name = "presence-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!(git_hash = env!("GIT_HASH"), "presence-monitor starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        processes = %config.processes().len(),
        ready_timeout_ms = %config.ready_timeout().as_millis(),
        shutdown_grace_ms = %config.shutdown_grace().as_millis(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let mut supervisor = Supervisor::new(&config);
    if let Err(e) = supervisor.start_all(config.processes()).await {
        error!(error = %format!("{e:#}"), "pipeline_start_failed");
        supervisor.shutdown().await;
        return Err(e);
    }
    info!(running = %supervisor.running(), "pipeline_started");

    supervisor.run_until_shutdown(shutdown_rx).await;

    info!("presence-monitor shutdown complete");
    Ok(())
}
