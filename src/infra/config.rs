//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing values fall back to the defaults the
//! pipeline was tuned with (1000x500 @ 25fps, ROI at 65-99% x 30-99%,
//! 300s absence threshold).

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Placeholder in supervisor process args replaced by the active config path
pub const CONFIG_PATH_PLACEHOLDER: &str = "{config}";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site identifier carried in log lines
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: "office".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// Raw camera feed published by the media relay
    pub input_url: String,
    /// Annotated feed re-published through the transcoder
    pub output_url: String,
    /// ffmpeg executable used for decoding and encoding
    pub ffmpeg_bin: String,
    /// Wait before reopening an input stream that failed to read
    pub reconnect_backoff_ms: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            input_url: "rtsp://127.0.0.1:8554/live".to_string(),
            output_url: "rtsp://127.0.0.1:8554/annotated".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            reconnect_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { width: 1000, height: 500, fps: 25 }
    }
}

/// ROI edges as fractions of frame width (x) and height (y)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self { x1: 0.65, y1: 0.30, x2: 0.99, y2: 0.99 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    pub absence_threshold_secs: u64,
    /// Pause after a frame fails to process
    pub frame_error_backoff_ms: u64,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self { absence_threshold_secs: 300, frame_error_backoff_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Inference sidecar endpoint accepting `image/jpeg` frames
    pub url: String,
    pub timeout_ms: u64,
    /// Class label counted as a person
    pub person_label: String,
    pub jpeg_quality: u8,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9100/track".to_string(),
            timeout_ms: 2000,
            person_label: "person".to_string(),
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventApiConfig {
    pub bind_address: String,
    pub port: u16,
    /// Endpoint the monitor posts ENTRY/EXIT events to
    pub url: String,
    /// Delivery timeout for a single event
    pub timeout_ms: u64,
    /// Depth of the monitor's outbound event queue
    pub queue_size: usize,
}

impl Default for EventApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            url: "http://127.0.0.1:8000/employee".to_string(),
            timeout_ms: 500,
            queue_size: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "presence.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub bind_address: String,
    pub port: u16,
    pub jpeg_quality: u8,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0".to_string(), port: 8001, jpeg_quality: 80 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

/// One child process managed by the supervisor
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the child
    #[serde(default)]
    pub cwd: Option<String>,
    /// Local TCP port that accepts connections once the child is ready
    #[serde(default)]
    pub ready_port: Option<u16>,
    /// Fixed wait after launch, used only when there is no `ready_port`
    #[serde(default)]
    pub start_delay_ms: u64,
}

impl ProcessSpec {
    fn new(name: &str, program: &str, args: &[&str], ready_port: Option<u16>) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            ready_port,
            start_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long to wait for a `ready_port` before launching the next process
    pub ready_timeout_ms: u64,
    /// How long children get to exit after SIGINT before being killed
    pub shutdown_grace_ms: u64,
    #[serde(rename = "process")]
    pub processes: Vec<ProcessSpec>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 10_000,
            shutdown_grace_ms: 5_000,
            processes: default_processes(),
        }
    }
}

/// Launch order: media relay, ingest, viewer, event API, monitor
fn default_processes() -> Vec<ProcessSpec> {
    vec![
        ProcessSpec::new("mediamtx", "mediamtx", &["mediamtx.yml"], Some(8554)),
        ProcessSpec::new(
            "ingest",
            "ffmpeg",
            &[
                "-loglevel", "error", "-re", "-stream_loop", "-1", "-i", "video.mp4", "-an", "-c:v",
                "copy", "-f", "rtsp", "rtsp://127.0.0.1:8554/live",
            ],
            None,
        ),
        ProcessSpec::new(
            "mjpeg-viewer",
            "mjpeg-viewer",
            &["--config", CONFIG_PATH_PLACEHOLDER],
            Some(8001),
        ),
        ProcessSpec::new(
            "event-api",
            "event-api",
            &["--config", CONFIG_PATH_PLACEHOLDER],
            Some(8000),
        ),
        ProcessSpec::new(
            "occupancy-monitor",
            "occupancy-monitor",
            &["--config", CONFIG_PATH_PLACEHOLDER],
            None,
        ),
    ]
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub site: SiteConfig,
    pub streams: StreamsConfig,
    pub frame: FrameConfig,
    pub roi: RoiConfig,
    pub occupancy: OccupancyConfig,
    pub detector: DetectorConfig,
    pub event_api: EventApiConfig,
    pub database: DatabaseConfig,
    pub viewer: ViewerConfig,
    pub metrics: MetricsConfig,
    pub supervisor: SupervisorConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    input_url: String,
    output_url: String,
    ffmpeg_bin: String,
    reconnect_backoff_ms: u64,
    frame_width: u32,
    frame_height: u32,
    frame_fps: u32,
    roi_fractions: (f64, f64, f64, f64),
    absence_threshold_secs: u64,
    frame_error_backoff_ms: u64,
    detector_url: String,
    detector_timeout_ms: u64,
    person_label: String,
    detector_jpeg_quality: u8,
    api_bind_address: String,
    api_port: u16,
    api_url: String,
    api_timeout_ms: u64,
    event_queue_size: usize,
    database_path: String,
    viewer_bind_address: String,
    viewer_port: u16,
    viewer_jpeg_quality: u8,
    metrics_interval_secs: u64,
    ready_timeout_ms: u64,
    shutdown_grace_ms: u64,
    processes: Vec<ProcessSpec>,
    config_file: String,
    loaded_from_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        let roi = toml_config.roi;
        Self {
            site_id: toml_config.site.id,
            input_url: toml_config.streams.input_url,
            output_url: toml_config.streams.output_url,
            ffmpeg_bin: toml_config.streams.ffmpeg_bin,
            reconnect_backoff_ms: toml_config.streams.reconnect_backoff_ms,
            frame_width: toml_config.frame.width,
            frame_height: toml_config.frame.height,
            frame_fps: toml_config.frame.fps,
            roi_fractions: (roi.x1, roi.y1, roi.x2, roi.y2),
            absence_threshold_secs: toml_config.occupancy.absence_threshold_secs,
            frame_error_backoff_ms: toml_config.occupancy.frame_error_backoff_ms,
            detector_url: toml_config.detector.url,
            detector_timeout_ms: toml_config.detector.timeout_ms,
            person_label: toml_config.detector.person_label,
            detector_jpeg_quality: toml_config.detector.jpeg_quality,
            api_bind_address: toml_config.event_api.bind_address,
            api_port: toml_config.event_api.port,
            api_url: toml_config.event_api.url,
            api_timeout_ms: toml_config.event_api.timeout_ms,
            event_queue_size: toml_config.event_api.queue_size,
            database_path: toml_config.database.path,
            viewer_bind_address: toml_config.viewer.bind_address,
            viewer_port: toml_config.viewer.port,
            viewer_jpeg_quality: toml_config.viewer.jpeg_quality,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            ready_timeout_ms: toml_config.supervisor.ready_timeout_ms,
            shutdown_grace_ms: toml_config.supervisor.shutdown_grace_ms,
            processes: toml_config.supervisor.processes,
            config_file: config_file.to_string(),
            loaded_from_file: false,
        }
    }

    /// Determine config file path from the CLI flag or environment
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let mut config = Self::from_toml(toml_config, &path.display().to_string());
        config.loaded_from_file = true;
        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn input_url(&self) -> &str {
        &self.input_url
    }

    pub fn output_url(&self) -> &str {
        &self.output_url
    }

    pub fn ffmpeg_bin(&self) -> &str {
        &self.ffmpeg_bin
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn frame_fps(&self) -> u32 {
        self.frame_fps
    }

    pub fn roi_fractions(&self) -> (f64, f64, f64, f64) {
        self.roi_fractions
    }

    pub fn absence_threshold(&self) -> Duration {
        Duration::from_secs(self.absence_threshold_secs)
    }

    pub fn frame_error_backoff(&self) -> Duration {
        Duration::from_millis(self.frame_error_backoff_ms)
    }

    pub fn detector_url(&self) -> &str {
        &self.detector_url
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    pub fn person_label(&self) -> &str {
        &self.person_label
    }

    pub fn detector_jpeg_quality(&self) -> u8 {
        self.detector_jpeg_quality
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn event_queue_size(&self) -> usize {
        self.event_queue_size
    }

    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    pub fn viewer_bind_address(&self) -> &str {
        &self.viewer_bind_address
    }

    pub fn viewer_port(&self) -> u16 {
        self.viewer_port
    }

    pub fn viewer_jpeg_quality(&self) -> u8 {
        self.viewer_jpeg_quality
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn processes(&self) -> &[ProcessSpec] {
        &self.processes
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Path of the file this config was read from, `None` when running on defaults
    pub fn source_file(&self) -> Option<&str> {
        self.loaded_from_file.then_some(self.config_file.as_str())
    }

    /// Builder method for tests to shorten the absence window
    #[cfg(test)]
    pub fn with_absence_threshold_secs(mut self, secs: u64) -> Self {
        self.absence_threshold_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.input_url(), "rtsp://127.0.0.1:8554/live");
        assert_eq!(config.output_url(), "rtsp://127.0.0.1:8554/annotated");
        assert_eq!(config.frame_width(), 1000);
        assert_eq!(config.frame_height(), 500);
        assert_eq!(config.frame_fps(), 25);
        assert_eq!(config.roi_fractions(), (0.65, 0.30, 0.99, 0.99));
        assert_eq!(config.absence_threshold(), Duration::from_secs(300));
        assert_eq!(config.api_url(), "http://127.0.0.1:8000/employee");
        assert_eq!(config.api_timeout(), Duration::from_millis(500));
        assert_eq!(config.api_port(), 8000);
        assert_eq!(config.viewer_port(), 8001);
        assert_eq!(config.person_label(), "person");
        assert_eq!(config.config_file(), "default");
        assert_eq!(config.source_file(), None);
    }

    #[test]
    fn test_default_process_order() {
        let config = Config::default();
        let names: Vec<&str> = config.processes().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["mediamtx", "ingest", "mjpeg-viewer", "event-api", "occupancy-monitor"]);
        assert_eq!(config.processes()[3].ready_port, Some(8000));
        assert!(config.processes()[4].args.contains(&CONFIG_PATH_PLACEHOLDER.to_string()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[frame]
width = 1280

[occupancy]
absence_threshold_secs = 60
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.frame_width(), 1280);
        assert_eq!(config.frame_height(), 500);
        assert_eq!(config.absence_threshold(), Duration::from_secs(60));
        assert_eq!(config.frame_error_backoff(), Duration::from_millis(1000));
        assert_eq!(config.processes().len(), 5);
    }

    #[test]
    fn test_process_table_overrides_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[[supervisor.process]]
name = "api"
program = "event-api"
args = ["--config", "{config}"]
ready_port = 9000

[[supervisor.process]]
name = "sleeper"
program = "sleep"
args = ["60"]
start_delay_ms = 250
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.processes().len(), 2);
        assert_eq!(config.processes()[0].ready_port, Some(9000));
        assert_eq!(config.processes()[1].ready_port, None);
        assert_eq!(config.processes()[1].start_delay_ms, 250);
        assert_eq!(config.ready_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_resolve_config_path_from_cli() {
        assert_eq!(Config::resolve_config_path(Some("config/site.toml")), "config/site.toml");
    }

    #[test]
    fn test_with_absence_threshold() {
        let config = Config::default().with_absence_threshold_secs(5);
        assert_eq!(config.absence_threshold(), Duration::from_secs(5));
    }
}
