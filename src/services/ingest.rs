//! Read ingestion: validate, resolve facility, apply to the registry
//!
//! Every read ends as exactly one `ReadOutcome`. Soft failures (unknown
//! location, stale or duplicate read) are counted and logged at debug, never
//! surfaced as errors.

use crate::domain::tag::LifecycleState;
use crate::domain::types::{LocationKind, ReadEvent, ResolvedRead, TimestampSource};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{EgressSender, InventoryEventKind, InventoryEventPayload};
use crate::services::directory::FacilityDirectory;
use crate::services::mobility::{MobilityProfile, MobilityReason};
use crate::services::registry::{ReadEffect, ReadOutcome, TagRegistry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Tally of a batch of reads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestCounts {
    /// Reads that changed registry state
    pub accepted: usize,
    /// Stale or duplicate reads
    pub unchanged: usize,
    pub invalid: usize,
}

impl IngestCounts {
    fn add(&mut self, outcome: &ReadOutcome) {
        match outcome.effect {
            ReadEffect::Invalid => self.invalid += 1,
            _ if outcome.mutated() => self.accepted += 1,
            _ => self.unchanged += 1,
        }
    }
}

/// Shared entry point for every read source
#[derive(Clone)]
pub struct Ingestor {
    registry: Arc<TagRegistry>,
    directory: Arc<FacilityDirectory>,
    metrics: Arc<Metrics>,
    profile: MobilityProfile,
    timestamp_source: TimestampSource,
    egress: Option<EgressSender>,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        registry: Arc<TagRegistry>,
        directory: Arc<FacilityDirectory>,
        metrics: Arc<Metrics>,
        egress: Option<EgressSender>,
    ) -> Self {
        Self {
            registry,
            directory,
            metrics,
            profile: MobilityProfile::from_config(config),
            timestamp_source: config.timestamp_source(),
            egress,
        }
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    /// Attach facility context; runs before any registry lock is taken
    fn resolve(&self, read: &ReadEvent) -> ResolvedRead {
        let info = self.directory.resolve(&read.location_id);
        if info.is_none() {
            self.metrics.record_directory_miss();
            debug!(location_id = %read.location_id, tag_id = %read.tag_id, "directory_miss");
        }
        let (facility_id, location_kind) = match info {
            Some(info) => (Some(info.facility_id), info.kind),
            None => (None, LocationKind::default()),
        };
        ResolvedRead {
            tag_id: read.tag_id.clone(),
            location_id: read.location_id.clone(),
            facility_id,
            location_kind,
            at: read.effective_at(self.timestamp_source),
            confidence: read.confidence,
        }
    }

    pub fn ingest(&self, read: &ReadEvent) -> ReadOutcome {
        let start = Instant::now();

        if !read.is_well_formed() {
            self.metrics.record_read_invalid();
            debug!(tag_id = %read.tag_id, location_id = %read.location_id, "read_invalid");
            self.metrics.record_read_processed(start.elapsed().as_micros() as u64);
            return ReadOutcome::unchanged(ReadEffect::Invalid);
        }

        let resolved = self.resolve(read);
        let outcome = self.registry.upsert_read(&resolved, &self.profile);
        self.record(&resolved, &outcome);

        self.metrics.record_read_processed(start.elapsed().as_micros() as u64);
        outcome
    }

    pub fn ingest_batch(&self, reads: &[ReadEvent]) -> IngestCounts {
        let mut counts = IngestCounts::default();
        for read in reads {
            counts.add(&self.ingest(read));
        }
        counts
    }

    fn record(&self, read: &ResolvedRead, outcome: &ReadOutcome) {
        let event = |kind| {
            InventoryEventPayload::new(kind, &read.tag_id, &read.location_id, read.facility_id.as_deref(), read.at)
        };

        match &outcome.effect {
            ReadEffect::Created => {
                self.metrics.record_tag_arrived();
                info!(
                    tag_id = %read.tag_id,
                    location_id = %read.location_id,
                    facility_id = ?read.facility_id,
                    "tag_arrived"
                );
                self.publish(event(InventoryEventKind::Arrival));
            }
            ReadEffect::Refreshed => {}
            ReadEffect::Moved { from } | ReadEffect::Returned { from } => {
                let returned = matches!(outcome.effect, ReadEffect::Returned { .. });
                self.metrics.record_location_change(returned);
                info!(
                    tag_id = %read.tag_id,
                    from = %from,
                    to = %read.location_id,
                    facility_id = ?read.facility_id,
                    confidence = %read.confidence,
                    effect = outcome.effect.as_str(),
                    "tag_location_changed"
                );
                let kind = if returned { InventoryEventKind::Returned } else { InventoryEventKind::Moved };
                self.publish(event(kind).with_prev_loc(from));
            }
            ReadEffect::Held(reason) => {
                match reason {
                    MobilityReason::HeldOff => self.metrics.record_move_held_off(),
                    _ => self.metrics.record_move_below_threshold(),
                }
                debug!(
                    tag_id = %read.tag_id,
                    candidate = %read.location_id,
                    confidence = %read.confidence,
                    reason = reason.as_str(),
                    "tag_move_rejected"
                );
            }
            ReadEffect::Stale => {
                self.metrics.record_read_stale();
                debug!(tag_id = %read.tag_id, at = %read.at, "read_stale");
            }
            ReadEffect::Duplicate => {
                self.metrics.record_read_duplicate();
            }
            ReadEffect::Invalid => {}
        }

        if let Some(from) = outcome.returned_from {
            self.metrics.record_tag_reappeared();
            info!(tag_id = %read.tag_id, from = %from, location_id = %read.location_id, "tag_reappeared");
            self.publish(
                event(InventoryEventKind::Reappeared)
                    .with_states(Some(from), Some(LifecycleState::Present)),
            );
        }
    }

    fn publish(&self, payload: InventoryEventPayload) {
        if let Some(ref egress) = self.egress {
            egress.send_inventory_event(payload);
        }
    }
}

/// Apply reads from one source until its channel closes or shutdown is signalled
///
/// On shutdown, reads already queued are still applied.
pub async fn run_ingest_worker(
    ingestor: Ingestor,
    mut rx: mpsc::Receiver<ReadEvent>,
    source: String,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(source = %source, "ingest_worker_started");

    loop {
        tokio::select! {
            read = rx.recv() => {
                match read {
                    Some(read) => {
                        ingestor.ingest(&read);
                    }
                    None => break,
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    while let Ok(read) = rx.try_recv() {
                        ingestor.ingest(&read);
                    }
                    break;
                }
            }
        }
    }

    info!(source = %source, "ingest_worker_stopped");
}
