//! Integration tests for configuration loading

use presence_monitor::infra::Config;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Sets `CONFIG_FILE` for the guard's lifetime and restores the previous value on drop
struct ConfigFileEnv {
    previous: Option<std::ffi::OsString>,
}

impl ConfigFileEnv {
    fn set(value: &std::path::Path) -> Self {
        let previous = std::env::var_os("CONFIG_FILE");
        std::env::set_var("CONFIG_FILE", value);
        Self { previous }
    }
}

impl Drop for ConfigFileEnv {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(v) => std::env::set_var("CONFIG_FILE", v),
            None => std::env::remove_var("CONFIG_FILE"),
        }
    }
}

#[test]
fn test_config_file_env_var_selects_file() {
    let _lock = ENV_LOCK.lock().unwrap();
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[site]\nid = \"from-env\"\n\n[viewer]\nport = 9101\n").unwrap();

    let path = {
        let _env = ConfigFileEnv::set(temp_file.path());
        let path = Config::resolve_config_path(None);
        assert_eq!(path, temp_file.path().display().to_string());

        // the CLI flag still wins over the environment
        assert_eq!(Config::resolve_config_path(Some("cli.toml")), "cli.toml");
        path
    };

    let config = Config::load_from_path(&path);
    assert_eq!(config.site_id(), "from-env");
    assert_eq!(config.viewer_port(), 9101);
    assert_eq!(config.source_file(), Some(path.as_str()));

    if std::env::var_os("CONFIG_FILE").is_none() {
        assert_eq!(Config::resolve_config_path(None), "config/dev.toml");
    }
}

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[streams]
input_url = "rtsp://camera.local:554/stream1"
ffmpeg_bin = "/opt/ffmpeg/bin/ffmpeg"

[frame]
width = 1280
height = 720
fps = 15

[roi]
x1 = 0.1
y1 = 0.2
x2 = 0.5
y2 = 0.9

[occupancy]
absence_threshold_secs = 60

[event_api]
port = 9000
url = "http://api.local:9000/employee"
timeout_ms = 250

[database]
path = "/var/lib/presence/events.db"

[[supervisor.process]]
name = "event-api"
program = "event-api"
args = ["--config", "{config}"]
ready_port = 9000
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.input_url(), "rtsp://camera.local:554/stream1");
    assert_eq!(config.output_url(), "rtsp://127.0.0.1:8554/annotated");
    assert_eq!(config.ffmpeg_bin(), "/opt/ffmpeg/bin/ffmpeg");
    assert_eq!(config.frame_width(), 1280);
    assert_eq!(config.frame_fps(), 15);
    assert_eq!(config.roi_fractions(), (0.1, 0.2, 0.5, 0.9));
    assert_eq!(config.absence_threshold(), Duration::from_secs(60));
    assert_eq!(config.api_port(), 9000);
    assert_eq!(config.api_timeout(), Duration::from_millis(250));
    assert_eq!(config.database_path(), "/var/lib/presence/events.db");

    // An explicit process list replaces the default pipeline
    assert_eq!(config.processes().len(), 1);
    assert_eq!(config.processes()[0].ready_port, Some(9000));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.frame_width(), 1000);
    assert_eq!(config.frame_height(), 500);
    assert_eq!(config.absence_threshold(), Duration::from_secs(300));
    assert_eq!(config.api_timeout(), Duration::from_millis(500));
    assert_eq!(config.processes().len(), 5);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_load_from_path_bad_toml_falls_back() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[frame\nwidth = ").unwrap();
    temp_file.flush().unwrap();

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.frame_width(), 1000);
}

#[test]
fn test_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.api_port(), 8000);
    assert_eq!(config.viewer_port(), 8001);
    let names: Vec<&str> = config.processes().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        ["mediamtx", "ingest", "detector", "mjpeg-viewer", "event-api", "occupancy-monitor"]
    );
}
