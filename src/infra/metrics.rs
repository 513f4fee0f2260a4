//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential frame latency bucket boundaries (microseconds)
/// Buckets: ≤5ms, ≤10ms, ≤20ms, ≤40ms, ≤80ms, ≤160ms, ≤320ms, ≤640ms, ≤1.28s, ≤2.56s, >2.56s
const BUCKET_BOUNDS: [u64; 10] =
    [5_000, 10_000, 20_000, 40_000, 80_000, 160_000, 320_000, 640_000, 1_280_000, 2_560_000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] = [
        5_000, 10_000, 20_000, 40_000, 80_000, 160_000, 320_000, 640_000, 1_280_000, 2_560_000,
        5_120_000,
    ];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the occupancy monitor
pub struct Metrics {
    /// Frames processed end to end (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max frame latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Frame latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Frames dropped because processing failed (monotonic)
    frame_errors_total: AtomicU64,
    /// Input stream reopens (monotonic)
    input_reconnects_total: AtomicU64,
    /// Transcoder respawns after a failed write (monotonic)
    encoder_respawns_total: AtomicU64,
    /// Events acknowledged by the event API (monotonic)
    events_delivered_total: AtomicU64,
    /// Events that could not be delivered (monotonic)
    events_failed_total: AtomicU64,
    /// Events dropped because the outbound queue was full (monotonic)
    events_dropped_total: AtomicU64,
    /// Absence alerts raised (monotonic)
    absence_alerts_total: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            frame_errors_total: AtomicU64::new(0),
            input_reconnects_total: AtomicU64::new(0),
            encoder_respawns_total: AtomicU64::new(0),
            events_delivered_total: AtomicU64::new(0),
            events_failed_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            absence_alerts_total: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a frame that went through read → detect → decide → annotate → write
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_error(&self) {
        self.frame_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_input_reconnect(&self) {
        self.input_reconnects_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_encoder_respawn(&self) {
        self.encoder_respawns_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_delivered(&self) {
        self.events_delivered_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_failed(&self) {
        self.events_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_absence_alert(&self) {
        self.absence_alerts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn events_delivered(&self) -> u64 {
        self.events_delivered_total.load(Ordering::Relaxed)
    }

    pub fn events_failed(&self) -> u64 {
        self.events_failed_total.load(Ordering::Relaxed)
    }

    pub fn absence_alerts(&self) -> u64 {
        self.absence_alerts_total.load(Ordering::Relaxed)
    }

    /// Snapshot and reset the periodic counters
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let fps = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            fps,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_buckets,
            frame_errors: self.frame_errors_total.load(Ordering::Relaxed),
            input_reconnects: self.input_reconnects_total.load(Ordering::Relaxed),
            encoder_respawns: self.encoder_respawns_total.load(Ordering::Relaxed),
            events_delivered: self.events_delivered_total.load(Ordering::Relaxed),
            events_failed: self.events_failed_total.load(Ordering::Relaxed),
            events_dropped: self.events_dropped_total.load(Ordering::Relaxed),
            absence_alerts: self.absence_alerts_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view produced by `Metrics::report()`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub fps: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub frame_errors: u64,
    pub input_reconnects: u64,
    pub encoder_respawns: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
    pub events_dropped: u64,
    pub absence_alerts: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            fps = format!("{:.1}", self.fps),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            p50_us = %self.lat_p50_us,
            p95_us = %self.lat_p95_us,
            frame_errors = %self.frame_errors,
            input_reconnects = %self.input_reconnects,
            encoder_respawns = %self.encoder_respawns,
            events_delivered = %self.events_delivered,
            events_failed = %self.events_failed,
            events_dropped = %self.events_dropped,
            absence_alerts = %self.absence_alerts,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.frames_total(), 0);
        assert_eq!(metrics.events_delivered(), 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(5_000), 0);
        assert_eq!(bucket_index(5_001), 1);
        assert_eq!(bucket_index(2_560_000), 9);
        assert_eq!(bucket_index(10_000_000), 10);
    }

    #[test]
    fn test_record_frames() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(4_000);
        metrics.record_frame_processed(30_000);
        assert_eq!(metrics.frames_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 34_000);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 30_000);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        for _ in 0..9 {
            metrics.record_frame_processed(8_000);
        }
        metrics.record_frame_processed(500_000);
        metrics.record_event_delivered();
        metrics.record_event_failed();
        metrics.record_absence_alert();

        let summary = metrics.report();
        assert_eq!(summary.frames_total, 10);
        assert_eq!(summary.max_frame_latency_us, 500_000);
        assert_eq!(summary.lat_p50_us, 10_000);
        assert_eq!(summary.lat_p95_us, 640_000);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 10);
        assert_eq!(summary.events_delivered, 1);
        assert_eq!(summary.events_failed, 1);
        assert_eq!(summary.absence_alerts, 1);

        let second = metrics.report();
        assert_eq!(second.frames_total, 10);
        assert_eq!(second.max_frame_latency_us, 0);
        assert_eq!(second.lat_buckets.iter().sum::<u64>(), 0);
        assert_eq!(second.events_delivered, 1);
    }

    #[test]
    fn test_percentile_empty() {
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.5), 0);
    }
}
