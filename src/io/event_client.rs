//! HTTP delivery of ENTRY/EXIT events to the event API
//!
//! Each event is one `POST` of `{"status": ..., "time": ...}` with a short
//! timeout. Failures are reported to the caller and never retried here.

use crate::domain::types::PresenceEvent;
use anyhow::Context;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("api returned status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
}

/// Outcome of a successful POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    pub latency_us: u64,
}

pub struct EventClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl EventClient {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .context("failed to build event http client")?;
        Ok(Self { client, url: url.to_string(), timeout })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn deliver(&self, event: &PresenceEvent) -> Result<Delivery, DeliveryError> {
        let start = Instant::now();
        let response =
            self.client.post(&self.url).json(&event.payload()).send().await.map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(self.timeout)
                } else if e.is_connect() {
                    DeliveryError::Connect(e.to_string())
                } else {
                    DeliveryError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(Delivery { status: status.as_u16(), latency_us: start.elapsed().as_micros() as u64 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EventStatus;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn event() -> PresenceEvent {
        let time = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        PresenceEvent::new(EventStatus::Entry, time)
    }

    /// Accept one request, hand its raw bytes back, reply with `status_line`
    async fn capture_server(status_line: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 2048];
            while !String::from_utf8_lossy(&buf).contains("}") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
            let body = r#"{"message":"ok"}"#;
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        (format!("http://{addr}/employee"), rx)
    }

    #[tokio::test]
    async fn test_deliver_posts_json_payload() {
        let (url, rx) = capture_server("HTTP/1.1 200 OK").await;
        let client = EventClient::new(&url, Duration::from_millis(500)).unwrap();

        let delivery = client.deliver(&event()).await.unwrap();
        assert_eq!(delivery.status, 200);

        let request = rx.await.unwrap();
        assert!(request.starts_with("POST /employee"));
        assert!(request.to_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""status":"ENTRY""#));
        assert!(request.contains(r#""time":"2024-01-01T09:00:00""#));
    }

    #[tokio::test]
    async fn test_deliver_non_success_status() {
        let (url, _rx) = capture_server("HTTP/1.1 500 Internal Server Error").await;
        let client = EventClient::new(&url, Duration::from_millis(500)).unwrap();
        assert!(matches!(client.deliver(&event()).await, Err(DeliveryError::Status(500))));
    }

    #[tokio::test]
    async fn test_deliver_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Hold the connection open without answering
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client =
            EventClient::new(&format!("http://{addr}/employee"), Duration::from_millis(200))
                .unwrap();

        let start = Instant::now();
        let result = client.deliver(&event()).await;
        assert!(matches!(result, Err(DeliveryError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deliver_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client =
            EventClient::new(&format!("http://{addr}/employee"), Duration::from_millis(500))
                .unwrap();
        assert!(matches!(client.deliver(&event()).await, Err(DeliveryError::Connect(_))));
    }
}
