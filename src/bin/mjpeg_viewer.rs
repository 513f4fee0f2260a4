//! MJPEG viewer - relays the annotated stream to browsers

use anyhow::Context;
use clap::Parser;
use presence_monitor::infra::{logging, Config};
use presence_monitor::io::{start_viewer, VideoFormat, ViewerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "mjpeg-viewer", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    info!(git_hash = env!("GIT_HASH"), "mjpeg-viewer starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    let addr: SocketAddr = format!("{}:{}", config.viewer_bind_address(), config.viewer_port())
        .parse()
        .context("invalid viewer bind address")?;
    info!(
        config_file = %config.config_file(),
        addr = %addr,
        source = %config.output_url(),
        "config_loaded"
    );

    let state = Arc::new(ViewerState {
        ffmpeg_bin: config.ffmpeg_bin().to_string(),
        source_url: config.output_url().to_string(),
        format: VideoFormat {
            width: config.frame_width(),
            height: config.frame_height(),
            fps: config.frame_fps(),
        },
        jpeg_quality: config.viewer_jpeg_quality(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    start_viewer(addr, state, shutdown_rx).await?;

    info!("mjpeg-viewer shutdown complete");
    Ok(())
}
