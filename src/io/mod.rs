//! IO modules - external system interfaces
//!
//! - `ffmpeg` - decoder/encoder subprocesses moving raw frames over pipes
//! - `jpeg` - JPEG encoding for outgoing frames
//! - `detector` - person detection and tracking sidecar client
//! - `event_client` - HTTP delivery of ENTRY/EXIT events
//! - `store` - SQLite event table
//! - `event_api` - HTTP endpoint recording events
//! - `mjpeg` - MJPEG viewer for the annotated stream

pub mod detector;
pub mod event_api;
pub mod event_client;
pub mod ffmpeg;
pub mod jpeg;
pub mod mjpeg;
pub mod store;

// Re-export commonly used types
pub use detector::{Detector, HttpDetector};
pub use event_api::{start_event_api, ApiState};
pub use event_client::{DeliveryError, EventClient};
pub use ffmpeg::{FrameSink, FrameSource, FrameStream, StreamError, VideoFormat};
pub use mjpeg::{start_viewer, ViewerState};
pub use store::EventStore;
