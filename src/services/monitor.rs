//! Occupancy monitor - the per-frame pipeline
//!
//! read -> detect -> assess -> step -> annotate -> write, strictly in order,
//! one frame at a time. Edge events leave through the event queue and never
//! hold up the loop.
//!
//! Failure handling:
//! - input read failure: drop the decoder, back off, reopen
//! - per-frame failure (detector, etc.): skip the frame, back off
//! - encoder write failure: drop the encoder, respawn on the next frame

use crate::domain::occupancy::{assess, OccupancyEffect, OccupancyState, Transition};
use crate::domain::roi::Roi;
use crate::domain::types::PresenceEvent;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::detector::Detector;
use crate::io::ffmpeg::{FrameSink, FrameSource, FrameStream, VideoFormat};
use crate::services::event_worker::EventSender;
use crate::services::overlay;
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct OccupancyMonitor<D: Detector> {
    detector: D,
    roi: Roi,
    state: OccupancyState,
    person_label: String,
    events: EventSender,
    metrics: Arc<Metrics>,
}

impl<D: Detector> OccupancyMonitor<D> {
    pub fn new(
        config: &Config,
        detector: D,
        events: EventSender,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let (width, height) = (config.frame_width(), config.frame_height());
        let roi = Roi::from_fractions(width, height, config.roi_fractions())?;
        Ok(Self {
            detector,
            roi,
            state: OccupancyState::new(config.absence_threshold()),
            person_label: config.person_label().to_string(),
            events,
            metrics,
        })
    }

    pub fn roi(&self) -> &Roi {
        &self.roi
    }

    pub fn state(&self) -> &OccupancyState {
        &self.state
    }

    /// Run one frame through detection and the state machine, annotating it in place.
    ///
    /// A detector error leaves the occupancy state untouched.
    pub async fn process_frame(
        &mut self,
        frame: &mut RgbImage,
        now: Instant,
    ) -> anyhow::Result<Transition> {
        let detections = self.detector.detect(frame).await?;
        let assessment = assess(&detections, &self.roi, &self.person_label);
        let transition = self.state.step(assessment.any_inside, now);

        debug!(
            detections = %detections.len(),
            people = %assessment.people.len(),
            any_inside = %assessment.any_inside,
            "frame_assessed"
        );

        self.apply(&transition);
        overlay::annotate(frame, &self.roi, &assessment, &transition.status);
        Ok(transition)
    }

    fn apply(&self, transition: &Transition) {
        for effect in &transition.effects {
            match *effect {
                OccupancyEffect::Edge(status) => {
                    info!(status = %status, "presence_event");
                    self.events.send(PresenceEvent::now(status));
                }
                OccupancyEffect::AbsenceAlert { absent_for } => {
                    self.metrics.record_absence_alert();
                    warn!(
                        absent_secs = %absent_for.as_secs(),
                        threshold_secs = %self.state.absence_threshold().as_secs(),
                        "absence_alert"
                    );
                }
            }
        }
    }
}

/// Sleep unless shutdown arrives first; true means stop
async fn backoff(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

/// Drive the monitor from the configured input until shutdown
pub async fn run_monitor<D: Detector>(
    config: &Config,
    mut monitor: OccupancyMonitor<D>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let format = VideoFormat {
        width: config.frame_width(),
        height: config.frame_height(),
        fps: config.frame_fps(),
    };
    let metrics = monitor.metrics.clone();
    let mut source: Option<FrameSource> = None;
    let mut sink: Option<FrameSink> = None;

    info!(
        input = %config.input_url(),
        output = %config.output_url(),
        detector = %monitor.detector.name(),
        roi = ?(monitor.roi.x1(), monitor.roi.y1(), monitor.roi.x2(), monitor.roi.y2()),
        "monitor_started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        if source.is_none() {
            match FrameSource::open(config.ffmpeg_bin(), config.input_url(), format) {
                Ok(s) => {
                    info!(url = %s.url(), "input_opened");
                    source = Some(s);
                }
                Err(e) => {
                    warn!(error = %e, url = %config.input_url(), "input_open_failed");
                    metrics.record_input_reconnect();
                    if backoff(config.reconnect_backoff(), &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            }
        }
        let Some(src) = source.as_mut() else { continue };

        let read = tokio::select! {
            r = src.next_frame() => r,
            _ = shutdown.changed() => break,
        };
        let mut frame = match read {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, url = %config.input_url(), "input_read_failed");
                source = None;
                metrics.record_input_reconnect();
                if backoff(config.reconnect_backoff(), &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        let start = Instant::now();
        if let Err(e) = monitor.process_frame(&mut frame, start).await {
            warn!(error = %e, "frame_processing_failed");
            metrics.record_frame_error();
            if backoff(config.frame_error_backoff(), &mut shutdown).await {
                break;
            }
            continue;
        }

        if sink.is_none() {
            match FrameSink::spawn(config.ffmpeg_bin(), config.output_url(), format) {
                Ok(s) => sink = Some(s),
                Err(e) => warn!(error = %e, url = %config.output_url(), "encoder_spawn_failed"),
            }
        }
        if let Some(out) = sink.as_mut() {
            if let Err(e) = out.write_frame(&frame).await {
                warn!(error = %e, "encoder_write_failed");
                sink = None;
                metrics.record_encoder_respawn();
            }
        }

        metrics.record_frame_processed(start.elapsed().as_micros() as u64);
    }

    info!(frames = %metrics.frames_total(), "monitor_stopped");
    Ok(())
}
