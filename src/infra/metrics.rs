//! Lock-free metrics collection for the polling pipeline
//!
//! Uses atomics so worker tasks can record without contention.
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination; the scheduler's
//! poll-in-progress flag lives in the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Courier fetch latency bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
pub const FETCH_BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
pub const FETCH_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    FETCH_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; FETCH_NUM_BUCKETS]) -> [u64; FETCH_NUM_BUCKETS] {
    let mut result = [0u64; FETCH_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; FETCH_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; FETCH_NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[FETCH_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Poll cycles that ran to completion
    cycles_total: AtomicU64,
    /// Invocations rejected because a cycle was already running
    cycles_rejected: AtomicU64,
    /// Duration of the most recent cycle
    last_cycle_ms: AtomicU64,
    /// Orders whose document was written with new history
    orders_updated: AtomicU64,
    /// Orders polled without any new history
    orders_unchanged: AtomicU64,
    /// Orders skipped (terminal or no docket)
    orders_skipped: AtomicU64,
    /// History entries appended
    events_appended: AtomicU64,
    /// Courier events discarded as regressions or stale replays
    events_discarded: AtomicU64,
    gateway_errors: AtomicU64,
    auth_errors: AtomicU64,
    not_found_errors: AtomicU64,
    validation_errors: AtomicU64,
    store_errors: AtomicU64,
    /// Courier fetch latency histogram
    fetch_latency_buckets: [AtomicU64; FETCH_NUM_BUCKETS],
    fetch_latency_sum_ms: AtomicU64,
    fetch_latency_max_ms: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_rejected: AtomicU64::new(0),
            last_cycle_ms: AtomicU64::new(0),
            orders_updated: AtomicU64::new(0),
            orders_unchanged: AtomicU64::new(0),
            orders_skipped: AtomicU64::new(0),
            events_appended: AtomicU64::new(0),
            events_discarded: AtomicU64::new(0),
            gateway_errors: AtomicU64::new(0),
            auth_errors: AtomicU64::new(0),
            not_found_errors: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            fetch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fetch_latency_sum_ms: AtomicU64::new(0),
            fetch_latency_max_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_cycle_completed(&self, duration_ms: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ms.store(duration_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle_rejected(&self) {
        self.cycles_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_order_updated(&self, appended: usize, discarded: usize) {
        self.orders_updated.fetch_add(1, Ordering::Relaxed);
        self.events_appended.fetch_add(appended as u64, Ordering::Relaxed);
        self.events_discarded.fetch_add(discarded as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_order_unchanged(&self, discarded: usize) {
        self.orders_unchanged.fetch_add(1, Ordering::Relaxed);
        self.events_discarded.fetch_add(discarded as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_order_skipped(&self) {
        self.orders_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a per-order failure by `TrackingError::kind()`
    pub fn record_order_failure(&self, kind: &str) {
        let counter = match kind {
            "gateway" => &self.gateway_errors,
            "auth" => &self.auth_errors,
            "not_found" => &self.not_found_errors,
            "validation" => &self.validation_errors,
            _ => &self.store_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch_latency(&self, latency_ms: u64) {
        self.fetch_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.fetch_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.fetch_latency_max_ms, latency_ms);
    }

    /// Snapshot all counters (nothing is reset)
    pub fn report(&self) -> MetricsSummary {
        let fetch_buckets = load_buckets(&self.fetch_latency_buckets);
        let fetch_count: u64 = fetch_buckets.iter().sum();
        let fetch_sum = self.fetch_latency_sum_ms.load(Ordering::Relaxed);

        MetricsSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_rejected: self.cycles_rejected.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            orders_updated: self.orders_updated.load(Ordering::Relaxed),
            orders_unchanged: self.orders_unchanged.load(Ordering::Relaxed),
            orders_skipped: self.orders_skipped.load(Ordering::Relaxed),
            events_appended: self.events_appended.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            gateway_errors: self.gateway_errors.load(Ordering::Relaxed),
            auth_errors: self.auth_errors.load(Ordering::Relaxed),
            not_found_errors: self.not_found_errors.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            fetch_buckets,
            fetch_count,
            fetch_sum_ms: fetch_sum,
            fetch_avg_ms: if fetch_count > 0 { fetch_sum / fetch_count } else { 0 },
            fetch_p95_ms: percentile_from_buckets(&fetch_buckets, 0.95),
            fetch_max_ms: self.fetch_latency_max_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_rejected: u64,
    pub last_cycle_ms: u64,
    pub orders_updated: u64,
    pub orders_unchanged: u64,
    pub orders_skipped: u64,
    pub events_appended: u64,
    pub events_discarded: u64,
    pub gateway_errors: u64,
    pub auth_errors: u64,
    pub not_found_errors: u64,
    pub validation_errors: u64,
    pub store_errors: u64,
    pub fetch_buckets: [u64; FETCH_NUM_BUCKETS],
    pub fetch_count: u64,
    pub fetch_sum_ms: u64,
    pub fetch_avg_ms: u64,
    pub fetch_p95_ms: u64,
    pub fetch_max_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            cycles = %self.cycles_total,
            cycles_rejected = %self.cycles_rejected,
            last_cycle_ms = %self.last_cycle_ms,
            updated = %self.orders_updated,
            unchanged = %self.orders_unchanged,
            appended = %self.events_appended,
            gateway_errors = %self.gateway_errors,
            auth_errors = %self.auth_errors,
            not_found = %self.not_found_errors,
            fetch_avg_ms = %self.fetch_avg_ms,
            fetch_p95_ms = %self.fetch_p95_ms,
            "metrics"
        );
    }
}
