//! Person detector and tracker seam
//!
//! The model runs out of process. `HttpDetector` posts each frame as JPEG to
//! a tracking sidecar and reads back tracked boxes:
//!
//! ```text
//! POST <detector.url>   Content-Type: image/jpeg
//! 200 {"detections":[{"track_id":3,"label":"person","bbox":[x1,y1,x2,y2]}]}
//! ```
//!
//! The sidecar keeps tracker state across calls, so one monitor owns one
//! detector and calls it with frames in stream order.

use crate::domain::types::Detection;
use crate::io::jpeg::encode_jpeg;
use anyhow::{bail, Context};
use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Detector: Send {
    /// Tracked detections for one frame, in frame pixel coordinates
    async fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
    jpeg_quality: u8,
}

impl HttpDetector {
    pub fn new(url: &str, timeout: Duration, jpeg_quality: u8) -> anyhow::Result<Self> {
        // One client for the process lifetime (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .context("failed to build detector http client")?;
        Ok(Self { client, url: url.to_string(), jpeg_quality })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&mut self, frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "image/jpeg")
            .body(jpeg)
            .send()
            .await
            .with_context(|| format!("detector request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("detector returned {}", status.as_u16());
        }

        let parsed: TrackResponse =
            response.json().await.context("detector returned malformed json")?;
        Ok(parsed.detections)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
