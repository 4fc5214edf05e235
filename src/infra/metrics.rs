//! Lock-free batch metrics collection and reporting
//!
//! Vehicle jobs run concurrently and record into one shared `Metrics`.
//! All counter updates are lock-free; `report()` takes a consistent-enough
//! snapshot once the batch has drained.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not drive any logic decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Per-vehicle processing time bucket bounds (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a duration using binary search
#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < duration_ms)
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

/// Load all bucket values
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
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

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free batch metrics collector
pub struct Metrics {
    /// Vehicles handed to the batch
    vehicles_total: AtomicU64,
    /// Vehicles segmented and written successfully
    vehicles_processed: AtomicU64,
    /// Vehicles below the minimum sample count
    vehicles_skipped: AtomicU64,
    /// Vehicles whose source read, sink write or job failed
    vehicles_failed: AtomicU64,
    /// Cleaned samples loaded across all vehicles
    samples_loaded: AtomicU64,
    /// Segments emitted by the state machine
    raw_segments: AtomicU64,
    /// Segments surviving the duration/distance filter
    filtered_segments: AtomicU64,
    /// Segments left after gap merging
    final_segments: AtomicU64,
    /// Trip records newly persisted by the sink
    trips_inserted: AtomicU64,
    /// Per-vehicle processing time histogram
    duration_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of per-vehicle processing times (ms)
    duration_sum_ms: AtomicU64,
    /// Longest per-vehicle processing time (ms)
    duration_max_ms: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            vehicles_total: AtomicU64::new(0),
            vehicles_processed: AtomicU64::new(0),
            vehicles_skipped: AtomicU64::new(0),
            vehicles_failed: AtomicU64::new(0),
            samples_loaded: AtomicU64::new(0),
            raw_segments: AtomicU64::new(0),
            filtered_segments: AtomicU64::new(0),
            final_segments: AtomicU64::new(0),
            trips_inserted: AtomicU64::new(0),
            duration_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            duration_sum_ms: AtomicU64::new(0),
            duration_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_vehicles_queued(&self, count: u64) {
        self.vehicles_total.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_samples_loaded(&self, count: u64) {
        self.samples_loaded.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the segment counts of one segmented vehicle (lock-free)
    #[inline]
    pub fn record_segments(&self, raw: u64, filtered: u64, merged: u64) {
        self.raw_segments.fetch_add(raw, Ordering::Relaxed);
        self.filtered_segments.fetch_add(filtered, Ordering::Relaxed);
        self.final_segments.fetch_add(merged, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_inserted(&self, count: u64) {
        self.trips_inserted.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_vehicle_processed(&self, duration_ms: u64) {
        self.vehicles_processed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration_ms);
    }

    #[inline]
    pub fn record_vehicle_skipped(&self, duration_ms: u64) {
        self.vehicles_skipped.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration_ms);
    }

    #[inline]
    pub fn record_vehicle_failed(&self, duration_ms: u64) {
        self.vehicles_failed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration_ms);
    }

    #[inline]
    fn record_duration(&self, duration_ms: u64) {
        self.duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.duration_buckets[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.duration_max_ms, duration_ms);
    }

    #[inline]
    pub fn trips_inserted(&self) -> u64 {
        self.trips_inserted.load(Ordering::Relaxed)
    }

    /// Snapshot all counters
    pub fn report(&self) -> MetricsSummary {
        let buckets = load_buckets(&self.duration_buckets);
        let processed = self.vehicles_processed.load(Ordering::Relaxed);
        let skipped = self.vehicles_skipped.load(Ordering::Relaxed);
        let failed = self.vehicles_failed.load(Ordering::Relaxed);
        let finished = processed + skipped + failed;
        let duration_sum_ms = self.duration_sum_ms.load(Ordering::Relaxed);

        MetricsSummary {
            vehicles_total: self.vehicles_total.load(Ordering::Relaxed),
            vehicles_processed: processed,
            vehicles_skipped: skipped,
            vehicles_failed: failed,
            samples_loaded: self.samples_loaded.load(Ordering::Relaxed),
            raw_segments: self.raw_segments.load(Ordering::Relaxed),
            filtered_segments: self.filtered_segments.load(Ordering::Relaxed),
            final_segments: self.final_segments.load(Ordering::Relaxed),
            trips_inserted: self.trips_inserted.load(Ordering::Relaxed),
            avg_vehicle_ms: if finished > 0 {
                duration_sum_ms as f64 / finished as f64
            } else {
                0.0
            },
            max_vehicle_ms: self.duration_max_ms.load(Ordering::Relaxed),
            p50_vehicle_ms: percentile_from_buckets(&buckets, 0.50),
            p95_vehicle_ms: percentile_from_buckets(&buckets, 0.95),
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the batch counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub vehicles_total: u64,
    pub vehicles_processed: u64,
    pub vehicles_skipped: u64,
    pub vehicles_failed: u64,
    pub samples_loaded: u64,
    pub raw_segments: u64,
    pub filtered_segments: u64,
    pub final_segments: u64,
    pub trips_inserted: u64,
    pub avg_vehicle_ms: f64,
    pub max_vehicle_ms: u64,
    /// Bucket upper bound containing the median vehicle time
    pub p50_vehicle_ms: u64,
    /// Bucket upper bound containing the 95th percentile vehicle time
    pub p95_vehicle_ms: u64,
    pub elapsed_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            vehicles = %self.vehicles_total,
            processed = %self.vehicles_processed,
            skipped = %self.vehicles_skipped,
            failed = %self.vehicles_failed,
            samples = %self.samples_loaded,
            raw_segments = %self.raw_segments,
            filtered_segments = %self.filtered_segments,
            final_segments = %self.final_segments,
            inserted = %self.trips_inserted,
            avg_vehicle_ms = format!("{:.1}", self.avg_vehicle_ms),
            p95_vehicle_ms = %self.p95_vehicle_ms,
            max_vehicle_ms = %self.max_vehicle_ms,
            elapsed_ms = %self.elapsed_ms,
            "batch_metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let summary = metrics.report();
        assert_eq!(summary.vehicles_total, 0);
        assert_eq!(summary.trips_inserted, 0);
        assert_eq!(summary.avg_vehicle_ms, 0.0);
        assert_eq!(summary.p95_vehicle_ms, 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(5), 0);
        assert_eq!(bucket_index(6), 1);
        assert_eq!(bucket_index(5000), 9);
        assert_eq!(bucket_index(5001), 10);
    }

    #[test]
    fn test_record_vehicle_outcomes() {
        let metrics = Metrics::new();
        metrics.record_vehicles_queued(3);
        metrics.record_vehicle_processed(4);
        metrics.record_vehicle_skipped(1);
        metrics.record_vehicle_failed(40);
        metrics.record_segments(5, 3, 2);
        metrics.record_inserted(2);

        let summary = metrics.report();
        assert_eq!(summary.vehicles_total, 3);
        assert_eq!(summary.vehicles_processed, 1);
        assert_eq!(summary.vehicles_skipped, 1);
        assert_eq!(summary.vehicles_failed, 1);
        assert_eq!(summary.raw_segments, 5);
        assert_eq!(summary.filtered_segments, 3);
        assert_eq!(summary.final_segments, 2);
        assert_eq!(summary.trips_inserted, 2);
        assert_eq!(summary.max_vehicle_ms, 40);
        assert_eq!(summary.avg_vehicle_ms, 15.0);
    }

    #[test]
    fn test_percentiles_from_buckets() {
        let metrics = Metrics::new();
        for _ in 0..19 {
            metrics.record_vehicle_processed(3);
        }
        metrics.record_vehicle_processed(3000);

        let summary = metrics.report();
        assert_eq!(summary.p50_vehicle_ms, 5);
        assert_eq!(summary.p95_vehicle_ms, 5);
        assert_eq!(summary.max_vehicle_ms, 3000);
    }

    #[test]
    fn test_update_atomic_max() {
        let max = AtomicU64::new(10);
        update_atomic_max(&max, 5);
        assert_eq!(max.load(Ordering::Relaxed), 10);
        update_atomic_max(&max, 25);
        assert_eq!(max.load(Ordering::Relaxed), 25);
    }
}
