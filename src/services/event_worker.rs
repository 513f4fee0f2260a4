//! Event delivery worker - posts ENTRY/EXIT events off the frame loop
//!
//! The monitor enqueues events with `try_send` and never waits on the
//! network. The worker drains the queue in order, one POST at a time.
//! Failed deliveries are logged and counted, never retried.

use crate::domain::types::PresenceEvent;
use crate::infra::metrics::Metrics;
use crate::io::event_client::EventClient;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// An event waiting for delivery
#[derive(Debug)]
pub struct QueuedEvent {
    pub event: PresenceEvent,
    /// When the event was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Non-blocking handle used by the frame loop
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<QueuedEvent>,
    metrics: Arc<Metrics>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<QueuedEvent>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Enqueue without waiting; a full or closed queue drops the event
    pub fn send(&self, event: PresenceEvent) -> bool {
        let status = event.status;
        match self.tx.try_send(QueuedEvent { event, enqueued_at: Instant::now() }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_event_dropped();
                warn!(status = %status, "event_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_event_dropped();
                warn!(status = %status, "event_queue_closed");
                false
            }
        }
    }
}

pub struct EventWorker {
    client: EventClient,
    rx: mpsc::Receiver<QueuedEvent>,
    metrics: Arc<Metrics>,
}

impl EventWorker {
    pub fn new(
        client: EventClient,
        rx: mpsc::Receiver<QueuedEvent>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { client, rx, metrics }
    }

    /// Run the worker until every sender is dropped
    pub async fn run(mut self) {
        info!(url = %self.client.url(), "event_worker_started");

        while let Some(queued) = self.rx.recv().await {
            let queue_delay_us = queued.enqueued_at.elapsed().as_micros() as u64;
            let event = &queued.event;

            match self.client.deliver(event).await {
                Ok(delivery) => {
                    self.metrics.record_event_delivered();
                    info!(
                        status = %event.status,
                        time = %event.payload().time,
                        http_status = %delivery.status,
                        latency_us = %delivery.latency_us,
                        queue_delay_us = %queue_delay_us,
                        "event_delivered"
                    );
                }
                Err(e) => {
                    self.metrics.record_event_failed();
                    warn!(
                        status = %event.status,
                        error = %e,
                        queue_delay_us = %queue_delay_us,
                        "event_delivery_failed"
                    );
                }
            }
        }

        info!("event_worker_stopped");
    }
}

/// Create an event queue and its worker
///
/// Returns the sender (for the monitor) and the worker (to be spawned)
pub fn create_event_worker(
    client: EventClient,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (EventSender, EventWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let worker = EventWorker::new(client, rx, metrics.clone());
    (EventSender::new(tx, metrics), worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EventStatus;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every connection with 200 after reading the JSON body
    async fn ok_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.ends_with(b"}") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let _ = stream
                        .write_all(
                            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
                        )
                        .await;
                });
            }
        });
        format!("http://{addr}/employee")
    }

    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/employee")
    }

    #[tokio::test]
    async fn test_worker_delivers_in_order() {
        let metrics = Arc::new(Metrics::new());
        let client = EventClient::new(&ok_server().await, Duration::from_millis(500)).unwrap();
        let (sender, worker) = create_event_worker(client, metrics.clone(), 8);
        let handle = tokio::spawn(worker.run());

        assert!(sender.send(PresenceEvent::now(EventStatus::Entry)));
        assert!(sender.send(PresenceEvent::now(EventStatus::Exit)));
        drop(sender);
        handle.await.unwrap();

        assert_eq!(metrics.events_delivered(), 2);
        assert_eq!(metrics.events_failed(), 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted_not_retried() {
        let metrics = Arc::new(Metrics::new());
        let client = EventClient::new(&refused_url().await, Duration::from_millis(500)).unwrap();
        let (sender, worker) = create_event_worker(client, metrics.clone(), 8);
        let handle = tokio::spawn(worker.run());

        sender.send(PresenceEvent::now(EventStatus::Entry));
        drop(sender);
        handle.await.unwrap();

        assert_eq!(metrics.events_failed(), 1);
        assert_eq!(metrics.events_delivered(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let metrics = Arc::new(Metrics::new());
        let client = EventClient::new(&refused_url().await, Duration::from_millis(500)).unwrap();
        // Worker is never started, so the queue stays full
        let (sender, _worker) = create_event_worker(client, metrics.clone(), 1);

        assert!(sender.send(PresenceEvent::now(EventStatus::Entry)));
        assert!(!sender.send(PresenceEvent::now(EventStatus::Exit)));
        assert_eq!(metrics.report().events_dropped, 1);
    }
}
