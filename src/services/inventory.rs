//! Point-in-time inventory views
//!
//! The registry copy is taken first; records are built and serialized after
//! every shard lock has been released.

use crate::domain::tag::{TagRecord, TagState};
use crate::domain::types::epoch_ms;
use crate::infra::error::EngineError;
use crate::infra::metrics::Metrics;
use crate::services::registry::{StateCounts, TagRegistry};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// Per-state totals served by `GET /inventory/summary`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    #[serde(rename = "siteID")]
    pub site_id: String,
    /// Epoch milliseconds when the counts were taken
    pub generated_at: u64,
    pub total: usize,
    pub by_state: StateCounts,
}

#[derive(Clone)]
pub struct InventoryService {
    registry: Arc<TagRegistry>,
    metrics: Arc<Metrics>,
    site_id: String,
}

impl InventoryService {
    pub fn new(registry: Arc<TagRegistry>, metrics: Arc<Metrics>, site_id: &str) -> Self {
        Self { registry, metrics, site_id: site_id.to_string() }
    }

    pub fn raw_inventory(&self) -> Result<Vec<TagRecord>, EngineError> {
        let tags = self.registry.snapshot();
        to_records(&tags)
    }

    /// Raw inventory as a JSON array; any failure leaves the registry untouched
    pub fn raw_inventory_json(&self) -> Result<Bytes, EngineError> {
        let result = self
            .raw_inventory()
            .and_then(|records| serde_json::to_vec(&records).map_err(EngineError::from));

        self.metrics.record_snapshot(result.is_ok());
        match result {
            Ok(json) => Ok(Bytes::from(json)),
            Err(e) => {
                error!(error = %e, code = e.code(), "inventory_snapshot_failed");
                Err(e)
            }
        }
    }

    pub fn summary(&self) -> InventorySummary {
        let by_state = self.registry.counts_by_state();
        InventorySummary {
            site_id: self.site_id.clone(),
            generated_at: epoch_ms(),
            total: by_state.total(),
            by_state,
        }
    }
}

fn to_records(tags: &[TagState]) -> Result<Vec<TagRecord>, EngineError> {
    tags.iter()
        .map(|tag| {
            tag.to_record()
                .ok_or_else(|| EngineError::TimestampOutOfRange { tag_id: tag.id().to_string() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{LocationKind, ResolvedRead};
    use crate::services::mobility::MobilityProfile;

    fn service() -> InventoryService {
        InventoryService::new(Arc::new(TagRegistry::new()), Arc::new(Metrics::new()), "dc-01")
    }

    fn read(tag: &str, at: u64) -> ResolvedRead {
        ResolvedRead {
            tag_id: tag.to_string(),
            location_id: "RSP-150000-0".to_string(),
            facility_id: Some("Front".to_string()),
            location_kind: LocationKind::Pos,
            at,
            confidence: 0.9,
        }
    }

    fn profile() -> MobilityProfile {
        MobilityProfile { threshold: 0.5, holdoff_ms: 0, slope: 0.0 }
    }

    #[test]
    fn test_raw_inventory_json() {
        let service = service();
        service.registry.upsert_read(&read("B", 1767617600000), &profile());
        service.registry.upsert_read(&read("A", 1767617600000), &profile());

        let json = service.raw_inventory_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "A");
        assert_eq!(records[0]["facilityID"], "Front");
        assert_eq!(records[0]["lifecycleState"], "present");
        assert_eq!(service.metrics.report(0).snapshots_total, 1);
    }

    #[test]
    fn test_empty_inventory_is_empty_array() {
        assert_eq!(&service().raw_inventory_json().unwrap()[..], b"[]");
    }

    #[test]
    fn test_unrepresentable_timestamp_is_error() {
        let service = service();
        service.registry.upsert_read(&read("A", u64::MAX), &profile());

        let err = service.raw_inventory_json().unwrap_err();
        assert!(matches!(err, EngineError::TimestampOutOfRange { ref tag_id } if tag_id == "A"));
        assert_eq!(err.code(), "invalid_timestamp");
        assert_eq!(service.metrics.report(0).snapshot_failures, 1);
        // Registry untouched
        assert_eq!(service.registry.len(), 1);
    }

    #[test]
    fn test_summary_counts() {
        let service = service();
        service.registry.upsert_read(&read("A", 1_000), &profile());
        service.registry.upsert_read(&read("B", 1_000), &profile());

        let summary = service.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.by_state.present, 2);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["siteID"], "dc-01");
        assert_eq!(json["byState"]["departedPos"], 0);
    }
}
