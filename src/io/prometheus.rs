//! Prometheus text exposition for `GET /metrics`

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::registry::StateCounts;
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
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
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

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, counts: &StateCounts, site_id: &str) -> String {
    let summary = metrics.report(counts.total());
    let mut output = String::with_capacity(8192);

    write_read_metrics(&mut output, site_id, &summary);
    write_tag_metrics(&mut output, site_id, counts);
    write_mobility_metrics(&mut output, site_id, &summary);
    write_lifecycle_metrics(&mut output, site_id, &summary);
    write_directory_metrics(&mut output, site_id, &summary);

    output
}

fn write_read_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "rfid_reads_total", "Total reads processed", MetricType::Counter, site, summary.reads_total);
    let _ = writeln!(output, "# HELP rfid_reads_per_sec Reads processed per second");
    let _ = writeln!(output, "# TYPE rfid_reads_per_sec gauge");
    let _ = writeln!(output, "rfid_reads_per_sec{{site=\"{site}\"}} {:.2}", summary.reads_per_sec);

    write_histogram(
        output,
        "rfid_read_latency_us",
        "Read processing latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );
    write_metric(output, "rfid_read_latency_p99_us", "99th percentile read latency", MetricType::Gauge, site, summary.lat_p99_us);

    write_metric(output, "rfid_reads_stale_total", "Reads older than the tag's last sighting", MetricType::Counter, site, summary.reads_stale);
    write_metric(output, "rfid_reads_duplicate_total", "Repeats of an already applied read", MetricType::Counter, site, summary.reads_duplicate);
    write_metric(output, "rfid_reads_invalid_total", "Reads missing tag or location", MetricType::Counter, site, summary.reads_invalid);
    write_metric(output, "rfid_reads_dropped_total", "Reads dropped at a full ingest channel", MetricType::Counter, site, summary.reads_dropped);
    write_metric(output, "rfid_payload_errors_total", "Read payloads that failed to parse", MetricType::Counter, site, summary.payload_errors);
}

fn write_tag_metrics(output: &mut String, site: &str, counts: &StateCounts) {
    let _ = writeln!(output, "# HELP rfid_tags Tags in the registry by lifecycle state");
    let _ = writeln!(output, "# TYPE rfid_tags gauge");
    for (state, count) in [
        ("present", counts.present),
        ("exiting", counts.exiting),
        ("departed_exit", counts.departed_exit),
        ("departed_pos", counts.departed_pos),
    ] {
        let _ = writeln!(output, "rfid_tags{{site=\"{site}\",state=\"{state}\"}} {count}");
    }
}

fn write_mobility_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "rfid_tags_arrived_total", "First sightings of unseen tags", MetricType::Counter, site, summary.tags_arrived);
    write_metric(output, "rfid_location_changes_total", "Accepted location changes", MetricType::Counter, site, summary.location_changes);
    write_metric(output, "rfid_location_returns_total", "Location changes back to the previous location", MetricType::Counter, site, summary.location_reverts);
    write_metric(output, "rfid_moves_held_off_total", "Moves rejected inside the holdoff window", MetricType::Counter, site, summary.moves_held_off);
    write_metric(output, "rfid_moves_below_threshold_total", "Moves rejected for low confidence", MetricType::Counter, site, summary.moves_below_threshold);
    write_metric(output, "rfid_tags_reappeared_total", "Exiting or departed tags read again", MetricType::Counter, site, summary.tags_reappeared);
}

fn write_lifecycle_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "rfid_sweeps_total", "Lifecycle sweeps run", MetricType::Counter, site, summary.sweeps_total);
    write_metric(output, "rfid_last_sweep_us", "Duration of the last sweep", MetricType::Gauge, site, summary.last_sweep_us);
    write_metric(output, "rfid_tags_exiting_total", "Transitions to exiting", MetricType::Counter, site, summary.tags_exiting);
    write_metric(output, "rfid_tags_departed_total", "Transitions to departed", MetricType::Counter, site, summary.tags_departed);
    write_metric(output, "rfid_tags_evicted_total", "Tags evicted after the age-out window", MetricType::Counter, site, summary.tags_evicted);
    write_metric(output, "rfid_snapshots_total", "Inventory snapshots served", MetricType::Counter, site, summary.snapshots_total);
    write_metric(output, "rfid_snapshot_failures_total", "Inventory snapshots that failed", MetricType::Counter, site, summary.snapshot_failures);
}

fn write_directory_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(output, "rfid_directory_size", "Locations known to the facility directory", MetricType::Gauge, site, summary.directory_size);
    write_metric(output, "rfid_directory_misses_total", "Reads at locations unknown to the directory", MetricType::Counter, site, summary.directory_misses);
    write_metric(
        output,
        "rfid_directory_refresh_failures_total",
        "Failed device catalog refreshes",
        MetricType::Counter,
        site,
        summary.directory_refresh_failures,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_read_processed(150);
        metrics.record_read_processed(250);
        metrics.record_directory_miss();

        let counts = StateCounts { present: 5, exiting: 1, departed_exit: 0, departed_pos: 2 };
        let output = format_prometheus_metrics(&metrics, &counts, "dc-01");

        assert!(output.contains("rfid_reads_total{site=\"dc-01\"} 2"));
        assert!(output.contains("rfid_read_latency_us_bucket{site=\"dc-01\""));
        assert!(output.contains("rfid_read_latency_us_count{site=\"dc-01\"} 2"));
        assert!(output.contains("rfid_tags{site=\"dc-01\",state=\"present\"} 5"));
        assert!(output.contains("rfid_tags{site=\"dc-01\",state=\"departed_pos\"} 2"));
        assert!(output.contains("rfid_directory_misses_total{site=\"dc-01\"} 1"));
    }
}
