//! Typed channel for MQTT egress messages
//!
//! Producers (ingest workers, the sweeper, the metrics reporter) never block:
//! if the bounded channel is full the message is dropped.

use crate::domain::tag::LifecycleState;
use crate::domain::types::epoch_ms;
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Tag arrival, move, return, departure or age-out
    InventoryEvent(InventoryEventPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Kind of inventory event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryEventKind {
    /// First read of an unseen tag
    Arrival,
    /// Committed to a new location
    Moved,
    /// Committed back to its previous location
    Returned,
    /// Exiting or departed tag read again
    Reappeared,
    /// Sweep declared the tag departed
    Departed,
    /// Tag evicted after the age-out window
    AgedOut,
}

impl InventoryEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryEventKind::Arrival => "arrival",
            InventoryEventKind::Moved => "moved",
            InventoryEventKind::Returned => "returned",
            InventoryEventKind::Reappeared => "reappeared",
            InventoryEventKind::Departed => "departed",
            InventoryEventKind::AgedOut => "aged_out",
        }
    }
}

/// Payload for inventory events
#[derive(Debug, Clone, Serialize)]
pub struct InventoryEventPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Event type
    pub t: InventoryEventKind,
    /// Tag id (EPC)
    pub tag: String,
    /// Committed location
    pub loc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fac: Option<String>,
    /// Location before a move or return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_loc: Option<String>,
    /// Lifecycle state after the event; absent once evicted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    /// Lifecycle state before a departure, reappearance or eviction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<LifecycleState>,
    /// Last time the tag was seen (epoch ms)
    pub last_seen: u64,
}

impl InventoryEventPayload {
    pub fn new(t: InventoryEventKind, tag: &str, loc: &str, fac: Option<&str>, last_seen: u64) -> Self {
        Self {
            site: None,
            ts: epoch_ms(),
            t,
            tag: tag.to_string(),
            loc: loc.to_string(),
            fac: fac.map(str::to_string),
            prev_loc: None,
            state: None,
            from_state: None,
            last_seen,
        }
    }

    pub fn with_prev_loc(mut self, prev_loc: &str) -> Self {
        self.prev_loc = Some(prev_loc.to_string());
        self
    }

    pub fn with_states(mut self, from: Option<LifecycleState>, to: Option<LifecycleState>) -> Self {
        self.from_state = from;
        self.state = to;
        self
    }
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub reads_total: u64,
    pub reads_per_sec: f64,
    /// Average processing latency (microseconds)
    pub avg_latency_us: u64,
    /// Max processing latency (microseconds)
    pub max_latency_us: u64,
    /// Read processing latency histogram buckets
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    /// Tags currently held in the registry
    pub tags: usize,
    pub tags_arrived: u64,
    pub location_changes: u64,
    pub moves_held_off: u64,
    pub moves_below_threshold: u64,
    pub reads_stale: u64,
    pub reads_dropped: u64,
    pub directory_misses: u64,
    pub tags_departed: u64,
    pub tags_evicted: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            reads_total: summary.reads_total,
            reads_per_sec: summary.reads_per_sec,
            avg_latency_us: summary.avg_latency_us,
            max_latency_us: summary.max_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            tags: summary.tag_count,
            tags_arrived: summary.tags_arrived,
            location_changes: summary.location_changes,
            moves_held_off: summary.moves_held_off,
            moves_below_threshold: summary.moves_below_threshold,
            reads_stale: summary.reads_stale,
            reads_dropped: summary.reads_dropped,
            directory_misses: summary.directory_misses,
            tags_departed: summary.tags_departed,
            tags_evicted: summary.tags_evicted,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send an inventory event; injects site_id into the payload
    pub fn send_inventory_event(&self, mut payload: InventoryEventPayload) {
        payload.site = Some(self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::InventoryEvent(payload));
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_inventory_event_injects_site() {
        let (sender, mut rx) = create_egress_channel(4, "dc-01".to_string());
        let payload = InventoryEventPayload::new(InventoryEventKind::Moved, "A", "L2", Some("Back"), 1_000)
            .with_prev_loc("L1")
            .with_states(None, Some(LifecycleState::Present));
        sender.send_inventory_event(payload);

        let Ok(EgressMessage::InventoryEvent(payload)) = rx.try_recv() else {
            panic!("expected inventory event");
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["site"], "dc-01");
        assert_eq!(json["t"], "moved");
        assert_eq!(json["prev_loc"], "L1");
        assert_eq!(json["state"], "present");
        assert!(json.get("from_state").is_none());
    }

    #[test]
    fn test_full_channel_drops() {
        let (sender, mut rx) = create_egress_channel(1, "dc-01".to_string());
        for _ in 0..3 {
            sender.send_inventory_event(InventoryEventPayload::new(
                InventoryEventKind::Arrival,
                "A",
                "L1",
                None,
                0,
            ));
        }
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_metrics_payload() {
        let (sender, mut rx) = create_egress_channel(1, "dc-01".to_string());
        let metrics = Metrics::new();
        metrics.record_read_processed(50);
        sender.send_metrics(metrics.report(7));

        let Ok(EgressMessage::Metrics(payload)) = rx.try_recv() else {
            panic!("expected metrics");
        };
        assert_eq!(payload.site, "dc-01");
        assert_eq!(payload.tags, 7);
        assert_eq!(payload.reads_total, 1);
    }
}
