//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not drive decisions.

use crate::domain::booking::Decision;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
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

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Gate state values for Prometheus gauge
pub const GATE_STATE_IDLE: u64 = 0;
pub const GATE_STATE_COOLDOWN: u64 = 1;
pub const GATE_STATE_OPEN: u64 = 2;

/// Lock-free metrics collector
pub struct Metrics {
    /// Frames processed (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame processing latencies (reset on report)
    frame_latency_sum_us: AtomicU64,
    /// Max frame processing latency (reset on report)
    frame_latency_max_us: AtomicU64,
    /// Frame latency histogram (reset on report)
    frame_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Raw OCR candidates seen (monotonic)
    readings_total: AtomicU64,
    /// Candidates discarded as empty or malformed (monotonic)
    readings_discarded: AtomicU64,
    /// Stabilizer confirmations (monotonic)
    confirmations_total: AtomicU64,
    /// Confirmations ignored because the gate was cooling down (monotonic)
    confirmations_throttled: AtomicU64,
    /// Decisions by variant (monotonic)
    decisions_authorize: AtomicU64,
    decisions_authorize_later: AtomicU64,
    decisions_deny: AtomicU64,
    /// Ledger queries that failed (monotonic)
    ledger_errors_total: AtomicU64,
    /// Ledger latency histogram (reset on report)
    ledger_latency_buckets: [AtomicU64; NUM_BUCKETS],
    ledger_latency_sum_us: AtomicU64,
    ledger_latency_max_us: AtomicU64,
    /// Actuation signals delivered to the actuator (monotonic)
    actuations_sent: AtomicU64,
    /// Actuation attempts that failed (monotonic)
    actuations_failed: AtomicU64,
    /// Frames dropped due to channel full (monotonic)
    frames_dropped: AtomicU64,
    /// Frame messages that failed to parse (monotonic)
    frames_malformed: AtomicU64,
    /// Actuation signals dropped due to channel full (monotonic)
    signals_dropped: AtomicU64,
    /// Current gate state (0=idle, 1=cooldown, 2=open)
    gate_state: AtomicU64,
    /// Active region stabilizers (snapshot)
    active_regions: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            frame_latency_sum_us: AtomicU64::new(0),
            frame_latency_max_us: AtomicU64::new(0),
            frame_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            readings_total: AtomicU64::new(0),
            readings_discarded: AtomicU64::new(0),
            confirmations_total: AtomicU64::new(0),
            confirmations_throttled: AtomicU64::new(0),
            decisions_authorize: AtomicU64::new(0),
            decisions_authorize_later: AtomicU64::new(0),
            decisions_deny: AtomicU64::new(0),
            ledger_errors_total: AtomicU64::new(0),
            ledger_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            ledger_latency_sum_us: AtomicU64::new(0),
            ledger_latency_max_us: AtomicU64::new(0),
            actuations_sent: AtomicU64::new(0),
            actuations_failed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            signals_dropped: AtomicU64::new(0),
            gate_state: AtomicU64::new(GATE_STATE_IDLE),
            active_regions: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a frame was processed with given latency (lock-free)
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.frame_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.frame_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.frame_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_reading(&self) {
        self.readings_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading_discarded(&self) {
        self.readings_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_confirmation(&self) {
        self.confirmations_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_confirmation_throttled(&self) {
        self.confirmations_throttled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decision(&self, decision: &Decision) {
        let counter = match decision {
            Decision::Authorize => &self.decisions_authorize,
            Decision::AuthorizeLater(_) => &self.decisions_authorize_later,
            Decision::Deny => &self.decisions_deny,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ledger_error(&self) {
        self.ledger_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record ledger query latency (lock-free)
    #[inline]
    pub fn record_ledger_latency(&self, latency_us: u64) {
        self.ledger_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.ledger_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.ledger_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_actuation(&self) {
        self.actuations_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_actuation_failed(&self) {
        self.actuations_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_signal_dropped(&self) {
        self.signals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Set gate state (0=idle, 1=cooldown, 2=open)
    #[inline]
    pub fn set_gate_state(&self, state: u64) {
        self.gate_state.store(state, Ordering::Relaxed);
    }

    #[inline]
    pub fn gate_state(&self) -> u64 {
        self.gate_state.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_active_regions(&self, count: usize) {
        self.active_regions.store(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn confirmations_total(&self) -> u64 {
        self.confirmations_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn actuations_sent(&self) -> u64 {
        self.actuations_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ledger_errors_total(&self) -> u64 {
        self.ledger_errors_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.frame_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.frame_latency_max_us.swap(0, Ordering::Relaxed);
        let frame_lat_buckets = swap_buckets(&self.frame_latency_buckets);

        let ledger_lat_buckets = swap_buckets(&self.ledger_latency_buckets);
        let ledger_sum = self.ledger_latency_sum_us.swap(0, Ordering::Relaxed);
        let ledger_max = self.ledger_latency_max_us.swap(0, Ordering::Relaxed);
        let ledger_count: u64 = ledger_lat_buckets.iter().sum();

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_per_sec,
            avg_frame_latency_us: if frames_count > 0 { latency_sum / frames_count } else { 0 },
            max_frame_latency_us: max_latency,
            frame_lat_p99_us: percentile_from_buckets(&frame_lat_buckets, 0.99),
            frame_lat_buckets,
            readings_total: self.readings_total.load(Ordering::Relaxed),
            readings_discarded: self.readings_discarded.load(Ordering::Relaxed),
            confirmations_total: self.confirmations_total.load(Ordering::Relaxed),
            confirmations_throttled: self.confirmations_throttled.load(Ordering::Relaxed),
            decisions_authorize: self.decisions_authorize.load(Ordering::Relaxed),
            decisions_authorize_later: self.decisions_authorize_later.load(Ordering::Relaxed),
            decisions_deny: self.decisions_deny.load(Ordering::Relaxed),
            ledger_errors_total: self.ledger_errors_total.load(Ordering::Relaxed),
            ledger_lat_avg_us: if ledger_count > 0 { ledger_sum / ledger_count } else { 0 },
            ledger_lat_max_us: ledger_max,
            ledger_lat_p99_us: percentile_from_buckets(&ledger_lat_buckets, 0.99),
            ledger_lat_buckets,
            actuations_sent: self.actuations_sent.load(Ordering::Relaxed),
            actuations_failed: self.actuations_failed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            signals_dropped: self.signals_dropped.load(Ordering::Relaxed),
            gate_state: self.gate_state.load(Ordering::Relaxed),
            active_regions: self.active_regions.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    pub frame_lat_p99_us: u64,
    /// Frame processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub frame_lat_buckets: [u64; NUM_BUCKETS],
    pub readings_total: u64,
    pub readings_discarded: u64,
    pub confirmations_total: u64,
    pub confirmations_throttled: u64,
    pub decisions_authorize: u64,
    pub decisions_authorize_later: u64,
    pub decisions_deny: u64,
    pub ledger_errors_total: u64,
    pub ledger_lat_avg_us: u64,
    pub ledger_lat_max_us: u64,
    pub ledger_lat_p99_us: u64,
    /// Ledger query latency histogram (same bounds)
    pub ledger_lat_buckets: [u64; NUM_BUCKETS],
    pub actuations_sent: u64,
    pub actuations_failed: u64,
    pub frames_dropped: u64,
    pub frames_malformed: u64,
    pub signals_dropped: u64,
    /// Current gate state (0=idle, 1=cooldown, 2=open)
    pub gate_state: u64,
    pub active_regions: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            readings = %self.readings_total,
            discarded = %self.readings_discarded,
            confirmations = %self.confirmations_total,
            throttled = %self.confirmations_throttled,
            authorize = %self.decisions_authorize,
            authorize_later = %self.decisions_authorize_later,
            deny = %self.decisions_deny,
            ledger_errors = %self.ledger_errors_total,
            ledger_p99_us = %self.ledger_lat_p99_us,
            actuations = %self.actuations_sent,
            active_regions = %self.active_regions,
            "metrics"
        );
    }
}
