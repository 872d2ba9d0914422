//! Facility directory: resolves a location id to its facility and reader kind
//!
//! Lookups take a read lock on a map that is replaced wholesale on refresh.
//! Entries from configuration seed the map; catalog entries override them.

use crate::domain::types::{DeviceEntry, LocationKind};
use crate::infra::metrics::Metrics;
use crate::io::catalog::DeviceCatalog;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationInfo {
    pub facility_id: String,
    pub kind: LocationKind,
}

pub struct FacilityDirectory {
    seed: Vec<DeviceEntry>,
    entries: RwLock<FxHashMap<String, LocationInfo>>,
}

impl FacilityDirectory {
    pub fn new(seed: Vec<DeviceEntry>) -> Self {
        let entries = build_map(&seed, &[]);
        Self { seed, entries: RwLock::new(entries) }
    }

    pub fn resolve(&self, location_id: &str) -> Option<LocationInfo> {
        self.entries.read().get(location_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace catalog-sourced entries; returns the new directory size
    pub fn replace(&self, catalog: &[DeviceEntry]) -> usize {
        let next = build_map(&self.seed, catalog);
        let size = next.len();
        *self.entries.write() = next;
        size
    }

    /// Fetch the catalog once and swap it in; the old map stays on failure
    pub async fn refresh(&self, catalog: &dyn DeviceCatalog, metrics: &Metrics) -> bool {
        match catalog.fetch().await {
            Ok(entries) => {
                let fetched = entries.len();
                let size = self.replace(&entries);
                metrics.set_directory_size(size);
                debug!(fetched = %fetched, size = %size, "directory_refreshed");
                true
            }
            Err(e) => {
                metrics.record_directory_refresh_failure();
                warn!(error = %e, code = e.code(), "directory_refresh_failed");
                false
            }
        }
    }
}

fn build_map(seed: &[DeviceEntry], catalog: &[DeviceEntry]) -> FxHashMap<String, LocationInfo> {
    let mut map = FxHashMap::default();
    for entry in seed.iter().chain(catalog) {
        map.insert(
            entry.location_id.clone(),
            LocationInfo { facility_id: entry.facility_id.clone(), kind: entry.kind },
        );
    }
    map
}

/// Refresh the directory from the catalog every `refresh_secs` until shutdown
pub async fn run_directory_refresh(
    directory: Arc<FacilityDirectory>,
    catalog: Arc<dyn DeviceCatalog>,
    metrics: Arc<Metrics>,
    refresh_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(refresh_secs = %refresh_secs, "directory_refresh_started");

    let mut ticker = interval(Duration::from_secs(refresh_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                directory.refresh(catalog.as_ref(), &metrics).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("directory_refresh_stopped");
}
