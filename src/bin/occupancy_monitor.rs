//! Occupancy monitor - detects people in the ROI and publishes the annotated stream

use clap::Parser;
use presence_monitor::infra::{logging, Config, Metrics};
use presence_monitor::io::{EventClient, HttpDetector};
use presence_monitor::services::{create_event_worker, run_monitor, OccupancyMonitor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "occupancy-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!(git_hash = env!("GIT_HASH"), "occupancy-monitor starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    let (fx1, fy1, fx2, fy2) = config.roi_fractions();
    let (w, h, fps) = (config.frame_width(), config.frame_height(), config.frame_fps());
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        input_url = %config.input_url(),
        output_url = %config.output_url(),
        frame = %format!("{w}x{h}@{fps}"),
        roi = %format!("{fx1},{fy1},{fx2},{fy2}"),
        absence_threshold_secs = %config.absence_threshold().as_secs(),
        detector_url = %config.detector_url(),
        api_url = %config.api_url(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Event delivery runs off the frame loop
    let client = EventClient::new(config.api_url(), config.api_timeout())?;
    let (events, worker) = create_event_worker(client, metrics.clone(), config.event_queue_size());
    let worker_handle = tokio::spawn(worker.run());

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    let detector = HttpDetector::new(
        config.detector_url(),
        config.detector_timeout(),
        config.detector_jpeg_quality(),
    )?;
    let monitor = OccupancyMonitor::new(&config, detector, events, metrics.clone())?;
    run_monitor(&config, monitor, shutdown_rx).await?;

    // Monitor dropped its sender; let queued events drain within the API timeout
    let drain = config.api_timeout() * 2;
    if tokio::time::timeout(drain, worker_handle).await.is_err() {
        info!("event_worker_drain_timeout");
    }

    metrics.report().log();
    info!("occupancy-monitor shutdown complete");
    Ok(())
}
