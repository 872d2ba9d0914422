//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid contention with the
//! registry shards. Reporting swaps the periodic counters; monotonic totals
//! are only ever loaded.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, ≤1280, ≤2560, ≤5120, >5120
const BUCKET_BOUNDS: [u64; 10] = [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120];
const NUM_BUCKETS: usize = 11;

/// Re-exported for the Prometheus formatter
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

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
        [10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Reads handed to the ingest path (monotonic)
    reads_total: AtomicU64,
    /// Reads since last report (reset on report)
    reads_since_report: AtomicU64,
    /// Sum of ingest latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max ingest latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Ingest latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// First sightings of a tag id (monotonic)
    tags_arrived: AtomicU64,
    /// Accepted location changes (monotonic)
    location_changes: AtomicU64,
    /// Accepted changes back to the previous location (monotonic)
    location_reverts: AtomicU64,
    /// Conflicting reads rejected by the holdoff (monotonic)
    moves_held_off: AtomicU64,
    /// Conflicting reads rejected by the confidence bar (monotonic)
    moves_below_threshold: AtomicU64,
    /// Exiting/departed tags read again (monotonic)
    tags_reappeared: AtomicU64,
    /// Reads older than the recorded last_seen_at (monotonic)
    reads_stale: AtomicU64,
    /// Exact repeats of the last applied read (monotonic)
    reads_duplicate: AtomicU64,
    /// Reads missing ids or carrying a bad confidence (monotonic)
    reads_invalid: AtomicU64,
    /// Reads whose location the directory does not know (monotonic)
    directory_misses: AtomicU64,
    /// Reads dropped at a source because its queue was full (monotonic)
    reads_dropped: AtomicU64,
    /// Source payloads that failed to parse (monotonic)
    payload_errors: AtomicU64,
    /// Sweeper passes (monotonic)
    sweeps_total: AtomicU64,
    /// Duration of the last sweep pass
    last_sweep_us: AtomicU64,
    /// Present -> Exiting transitions (monotonic)
    tags_exiting: AtomicU64,
    /// Transitions into a departed state (monotonic)
    tags_departed: AtomicU64,
    /// Evicted tags (monotonic)
    tags_evicted: AtomicU64,
    /// Locations currently known to the directory
    directory_size: AtomicU64,
    /// Failed catalog refreshes (monotonic)
    directory_refresh_failures: AtomicU64,
    /// Inventory snapshots served (monotonic)
    snapshots_total: AtomicU64,
    /// Inventory snapshots that failed to serialize (monotonic)
    snapshot_failures: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            reads_total: AtomicU64::new(0),
            reads_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            tags_arrived: AtomicU64::new(0),
            location_changes: AtomicU64::new(0),
            location_reverts: AtomicU64::new(0),
            moves_held_off: AtomicU64::new(0),
            moves_below_threshold: AtomicU64::new(0),
            tags_reappeared: AtomicU64::new(0),
            reads_stale: AtomicU64::new(0),
            reads_duplicate: AtomicU64::new(0),
            reads_invalid: AtomicU64::new(0),
            directory_misses: AtomicU64::new(0),
            reads_dropped: AtomicU64::new(0),
            payload_errors: AtomicU64::new(0),
            sweeps_total: AtomicU64::new(0),
            last_sweep_us: AtomicU64::new(0),
            tags_exiting: AtomicU64::new(0),
            tags_departed: AtomicU64::new(0),
            tags_evicted: AtomicU64::new(0),
            directory_size: AtomicU64::new(0),
            directory_refresh_failures: AtomicU64::new(0),
            snapshots_total: AtomicU64::new(0),
            snapshot_failures: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a read went through the ingest path with given latency (lock-free)
    #[inline]
    pub fn record_read_processed(&self, latency_us: u64) {
        self.reads_total.fetch_add(1, Ordering::Relaxed);
        self.reads_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_tag_arrived(&self) {
        self.tags_arrived.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_location_change(&self, reverted: bool) {
        self.location_changes.fetch_add(1, Ordering::Relaxed);
        if reverted {
            self.location_reverts.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_move_held_off(&self) {
        self.moves_held_off.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_move_below_threshold(&self) {
        self.moves_below_threshold.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tag_reappeared(&self) {
        self.tags_reappeared.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_stale(&self) {
        self.reads_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_duplicate(&self) {
        self.reads_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_invalid(&self) {
        self.reads_invalid.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_directory_miss(&self) {
        self.directory_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read dropped due to a full source queue (lock-free)
    #[inline]
    pub fn record_read_dropped(&self) {
        self.reads_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_payload_error(&self) {
        self.payload_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one sweeper pass
    pub fn record_sweep(&self, exiting: usize, departed: usize, evicted: usize, duration_us: u64) {
        self.sweeps_total.fetch_add(1, Ordering::Relaxed);
        self.last_sweep_us.store(duration_us, Ordering::Relaxed);
        self.tags_exiting.fetch_add(exiting as u64, Ordering::Relaxed);
        self.tags_departed.fetch_add(departed as u64, Ordering::Relaxed);
        self.tags_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_directory_size(&self, size: usize) {
        self.directory_size.store(size as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_directory_refresh_failure(&self) {
        self.directory_refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot(&self, ok: bool) {
        self.snapshots_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn reads_total(&self) -> u64 {
        self.reads_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn directory_misses(&self) -> u64 {
        self.directory_misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reads_dropped(&self) -> u64 {
        self.reads_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tags_evicted(&self) -> u64 {
        self.tags_evicted.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// `tag_count` is the registry size at report time.
    pub fn report(&self, tag_count: usize) -> MetricsSummary {
        let reads_count = self.reads_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };

        let reads_per_sec = if elapsed_secs > 0.0 { reads_count as f64 / elapsed_secs } else { 0.0 };
        let avg_latency_us = if reads_count > 0 { latency_sum / reads_count } else { 0 };

        MetricsSummary {
            reads_total: self.reads_total.load(Ordering::Relaxed),
            reads_per_sec,
            avg_latency_us,
            max_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            tag_count,
            tags_arrived: self.tags_arrived.load(Ordering::Relaxed),
            location_changes: self.location_changes.load(Ordering::Relaxed),
            location_reverts: self.location_reverts.load(Ordering::Relaxed),
            moves_held_off: self.moves_held_off.load(Ordering::Relaxed),
            moves_below_threshold: self.moves_below_threshold.load(Ordering::Relaxed),
            tags_reappeared: self.tags_reappeared.load(Ordering::Relaxed),
            reads_stale: self.reads_stale.load(Ordering::Relaxed),
            reads_duplicate: self.reads_duplicate.load(Ordering::Relaxed),
            reads_invalid: self.reads_invalid.load(Ordering::Relaxed),
            directory_misses: self.directory_misses.load(Ordering::Relaxed),
            reads_dropped: self.reads_dropped.load(Ordering::Relaxed),
            payload_errors: self.payload_errors.load(Ordering::Relaxed),
            sweeps_total: self.sweeps_total.load(Ordering::Relaxed),
            last_sweep_us: self.last_sweep_us.load(Ordering::Relaxed),
            tags_exiting: self.tags_exiting.load(Ordering::Relaxed),
            tags_departed: self.tags_departed.load(Ordering::Relaxed),
            tags_evicted: self.tags_evicted.load(Ordering::Relaxed),
            directory_size: self.directory_size.load(Ordering::Relaxed),
            directory_refresh_failures: self.directory_refresh_failures.load(Ordering::Relaxed),
            snapshots_total: self.snapshots_total.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the metrics, produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub reads_total: u64,
    pub reads_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub tag_count: usize,
    pub tags_arrived: u64,
    pub location_changes: u64,
    pub location_reverts: u64,
    pub moves_held_off: u64,
    pub moves_below_threshold: u64,
    pub tags_reappeared: u64,
    pub reads_stale: u64,
    pub reads_duplicate: u64,
    pub reads_invalid: u64,
    pub directory_misses: u64,
    pub reads_dropped: u64,
    pub payload_errors: u64,
    pub sweeps_total: u64,
    pub last_sweep_us: u64,
    pub tags_exiting: u64,
    pub tags_departed: u64,
    pub tags_evicted: u64,
    pub directory_size: u64,
    pub directory_refresh_failures: u64,
    pub snapshots_total: u64,
    pub snapshot_failures: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            reads_total = %self.reads_total,
            reads_per_sec = format!("{:.1}", self.reads_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p99_us = %self.lat_p99_us,
            tags = %self.tag_count,
            moves = %self.location_changes,
            held_off = %self.moves_held_off,
            stale = %self.reads_stale,
            directory_misses = %self.directory_misses,
            dropped = %self.reads_dropped,
            departed = %self.tags_departed,
            evicted = %self.tags_evicted,
            "metrics"
        );
    }
}
