//! Prometheus text exposition for `GET /metrics`

use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with cumulative buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format a summary in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, site: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_presence_metrics(&mut output, site, summary);
    write_snapshot_metrics(&mut output, site, summary);
    write_incident_metrics(&mut output, site, summary);

    output
}

fn write_presence_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fieldwatch_subjects",
        "Subjects on the roster",
        MetricType::Gauge,
        site,
        summary.subjects as u64,
    );
    write_metric(
        output,
        "fieldwatch_samples_ingested_total",
        "Presence samples accepted",
        MetricType::Counter,
        site,
        summary.samples_ingested,
    );
    write_metric(
        output,
        "fieldwatch_samples_rejected_total",
        "Presence samples rejected by validation",
        MetricType::Counter,
        site,
        summary.samples_rejected,
    );
    write_metric(
        output,
        "fieldwatch_samples_superseded_total",
        "Late samples kept in history only",
        MetricType::Counter,
        site,
        summary.samples_superseded,
    );
    write_gauge_f64(
        output,
        "fieldwatch_ingest_per_sec",
        "Samples ingested per second since the last report",
        site,
        summary.ingest_per_sec,
    );
    write_metric(
        output,
        "fieldwatch_history_queries_total",
        "History reads served",
        MetricType::Counter,
        site,
        summary.history_queries,
    );
    write_metric(
        output,
        "fieldwatch_history_points_pruned_total",
        "History points dropped by retention",
        MetricType::Counter,
        site,
        summary.history_points_pruned,
    );
}

fn write_snapshot_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fieldwatch_snapshots_total",
        "Roster snapshots served",
        MetricType::Counter,
        site,
        summary.snapshots_served,
    );
    write_histogram(
        output,
        "fieldwatch_snapshot_latency_us",
        "Roster snapshot build time in microseconds",
        site,
        &summary.snapshot_buckets,
        summary.snapshot_latency_sum_us,
    );
    write_metric(
        output,
        "fieldwatch_snapshot_latency_p99_us",
        "99th percentile snapshot build time",
        MetricType::Gauge,
        site,
        summary.snapshot_p99_us,
    );
    write_metric(
        output,
        "fieldwatch_snapshot_latency_max_us",
        "Maximum snapshot build time",
        MetricType::Gauge,
        site,
        summary.snapshot_max_us,
    );
}

fn write_incident_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "fieldwatch_incidents_pending",
        "Incidents awaiting resolution",
        MetricType::Gauge,
        site,
        summary.pending_incidents as u64,
    );
    write_metric(
        output,
        "fieldwatch_incidents_created_total",
        "Incidents recorded",
        MetricType::Counter,
        site,
        summary.incidents_created,
    );
    write_metric(
        output,
        "fieldwatch_incidents_deduplicated_total",
        "Incident creates folded into an existing incident",
        MetricType::Counter,
        site,
        summary.incidents_deduplicated,
    );
    write_metric(
        output,
        "fieldwatch_incidents_resolved_total",
        "Incidents resolved",
        MetricType::Counter,
        site,
        summary.incidents_resolved,
    );
    write_metric(
        output,
        "fieldwatch_resolve_conflicts_total",
        "Resolves rejected as already resolved",
        MetricType::Counter,
        site,
        summary.resolve_conflicts,
    );
    write_metric(
        output,
        "fieldwatch_events_dropped_total",
        "Side-effect events dropped due to channel full",
        MetricType::Counter,
        site,
        summary.events_dropped,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_sample_ingested();
        metrics.record_snapshot(150);
        metrics.record_snapshot(30_000);
        metrics.record_incident_created(false);

        let output = format_prometheus_metrics(&metrics.report(5, 2), "jkt");

        assert!(output.contains("fieldwatch_subjects{site=\"jkt\"} 5"));
        assert!(output.contains("fieldwatch_incidents_pending{site=\"jkt\"} 2"));
        assert!(output.contains("fieldwatch_samples_ingested_total{site=\"jkt\"} 1"));
        assert!(output.contains("fieldwatch_snapshot_latency_us_bucket{site=\"jkt\",le=\"200\"} 1"));
        assert!(output.contains("fieldwatch_snapshot_latency_us_bucket{site=\"jkt\",le=\"+Inf\"} 2"));
        assert!(output.contains("fieldwatch_snapshot_latency_us_sum{site=\"jkt\"} 30150"));
        assert!(output.contains("# TYPE fieldwatch_incidents_created_total counter"));
    }
}
