//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting swaps the windowed values.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

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

/// Load all bucket values without resetting
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

    let target = (total as f64 * percentile).ceil() as u64;
    let mut cumulative = 0u64;

    // last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

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
    samples_ingested: AtomicU64,
    samples_rejected: AtomicU64,
    /// Late arrivals recorded to history without replacing the current sample
    samples_superseded: AtomicU64,
    snapshots_served: AtomicU64,
    /// Snapshot build latency histogram (cumulative)
    snapshot_buckets: [AtomicU64; NUM_BUCKETS],
    snapshot_latency_sum_us: AtomicU64,
    snapshot_latency_max_us: AtomicU64,
    history_queries: AtomicU64,
    history_points_pruned: AtomicU64,
    incidents_created: AtomicU64,
    incidents_deduplicated: AtomicU64,
    incidents_resolved: AtomicU64,
    resolve_conflicts: AtomicU64,
    events_dropped: AtomicU64,
    /// Ingests since the last report, for a per-second rate
    ingested_since_report: AtomicU64,
    last_report: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            samples_superseded: AtomicU64::new(0),
            snapshots_served: AtomicU64::new(0),
            snapshot_buckets: Default::default(),
            snapshot_latency_sum_us: AtomicU64::new(0),
            snapshot_latency_max_us: AtomicU64::new(0),
            history_queries: AtomicU64::new(0),
            history_points_pruned: AtomicU64::new(0),
            incidents_created: AtomicU64::new(0),
            incidents_deduplicated: AtomicU64::new(0),
            incidents_resolved: AtomicU64::new(0),
            resolve_conflicts: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            ingested_since_report: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sample_ingested(&self) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
        self.ingested_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample_superseded(&self) {
        self.samples_superseded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot(&self, latency_us: u64) {
        self.snapshots_served.fetch_add(1, Ordering::Relaxed);
        self.snapshot_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.snapshot_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.snapshot_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_history_query(&self) {
        self.history_queries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_history_pruned(&self, points: u64) {
        self.history_points_pruned.fetch_add(points, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_incident_created(&self, deduplicated: bool) {
        if deduplicated {
            self.incidents_deduplicated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.incidents_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_incident_resolved(&self) {
        self.incidents_resolved.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_resolve_conflict(&self) {
        self.resolve_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot. Only the ingest rate window is reset.
    pub fn report(&self, subjects: usize, pending_incidents: usize) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let window = self.ingested_since_report.swap(0, Ordering::Relaxed);
        let ingest_per_sec = if elapsed.as_secs_f64() > 0.0 {
            window as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let snapshot_buckets = load_buckets(&self.snapshot_buckets);
        let snapshots_served = self.snapshots_served.load(Ordering::Relaxed);
        let snapshot_latency_sum_us = self.snapshot_latency_sum_us.load(Ordering::Relaxed);

        MetricsSummary {
            subjects,
            pending_incidents,
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            samples_superseded: self.samples_superseded.load(Ordering::Relaxed),
            ingest_per_sec,
            snapshots_served,
            snapshot_buckets,
            snapshot_latency_sum_us,
            snapshot_avg_us: if snapshots_served > 0 {
                snapshot_latency_sum_us / snapshots_served
            } else {
                0
            },
            snapshot_max_us: self.snapshot_latency_max_us.load(Ordering::Relaxed),
            snapshot_p99_us: percentile_from_buckets(&snapshot_buckets, 0.99),
            history_queries: self.history_queries.load(Ordering::Relaxed),
            history_points_pruned: self.history_points_pruned.load(Ordering::Relaxed),
            incidents_created: self.incidents_created.load(Ordering::Relaxed),
            incidents_deduplicated: self.incidents_deduplicated.load(Ordering::Relaxed),
            incidents_resolved: self.incidents_resolved.load(Ordering::Relaxed),
            resolve_conflicts: self.resolve_conflicts.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of all counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub subjects: usize,
    pub pending_incidents: usize,
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub samples_superseded: u64,
    pub ingest_per_sec: f64,
    pub snapshots_served: u64,
    pub snapshot_buckets: [u64; NUM_BUCKETS],
    pub snapshot_latency_sum_us: u64,
    pub snapshot_avg_us: u64,
    pub snapshot_max_us: u64,
    pub snapshot_p99_us: u64,
    pub history_queries: u64,
    pub history_points_pruned: u64,
    pub incidents_created: u64,
    pub incidents_deduplicated: u64,
    pub incidents_resolved: u64,
    pub resolve_conflicts: u64,
    pub events_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            subjects = %self.subjects,
            pending_incidents = %self.pending_incidents,
            samples_ingested = %self.samples_ingested,
            samples_rejected = %self.samples_rejected,
            samples_superseded = %self.samples_superseded,
            ingest_per_sec = %format!("{:.2}", self.ingest_per_sec),
            snapshots_served = %self.snapshots_served,
            snapshot_avg_us = %self.snapshot_avg_us,
            snapshot_p99_us = %self.snapshot_p99_us,
            history_queries = %self.history_queries,
            incidents_created = %self.incidents_created,
            incidents_deduplicated = %self.incidents_deduplicated,
            incidents_resolved = %self.incidents_resolved,
            resolve_conflicts = %self.resolve_conflicts,
            events_dropped = %self.events_dropped,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(51), 1);
        assert_eq!(bucket_index(25600), 9);
        assert_eq!(bucket_index(1_000_000), 10);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        buckets[0] = 99;
        buckets[5] = 1;
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 50);
        assert_eq!(percentile_from_buckets(&buckets, 1.0), 1600);
        assert_eq!(percentile_from_buckets(&[0; NUM_BUCKETS], 0.99), 0);
    }

    #[test]
    fn test_report_counts() {
        let metrics = Metrics::new();
        metrics.record_sample_ingested();
        metrics.record_sample_ingested();
        metrics.record_sample_rejected();
        metrics.record_snapshot(120);
        metrics.record_snapshot(80);
        metrics.record_incident_created(false);
        metrics.record_incident_created(true);
        metrics.record_incident_resolved();
        metrics.record_resolve_conflict();

        let summary = metrics.report(3, 1);
        assert_eq!(summary.subjects, 3);
        assert_eq!(summary.samples_ingested, 2);
        assert_eq!(summary.samples_rejected, 1);
        assert_eq!(summary.snapshots_served, 2);
        assert_eq!(summary.snapshot_avg_us, 100);
        assert_eq!(summary.snapshot_max_us, 120);
        assert_eq!(summary.incidents_created, 1);
        assert_eq!(summary.incidents_deduplicated, 1);
        assert_eq!(summary.resolve_conflicts, 1);

        // cumulative counters survive a report
        let again = metrics.report(3, 1);
        assert_eq!(again.samples_ingested, 2);
    }
}
