//! End-to-end engine behaviour: ingest, sweep and snapshot against one registry

use rfid_inventory::domain::{DeviceEntry, LifecycleState, LocationKind, ReadEvent};
use rfid_inventory::infra::{Config, Metrics};
use rfid_inventory::services::{
    FacilityDirectory, Ingestor, InventoryService, LifecyclePolicy, ReadEffect, Sweeper, TagRegistry,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const T0: u64 = 1_767_617_600_000;

fn location_kind(index: usize) -> LocationKind {
    if index % 2 == 0 {
        LocationKind::Exit
    } else {
        LocationKind::Pos
    }
}

fn directory(locations: usize) -> Arc<FacilityDirectory> {
    let entries = (0..locations)
        .map(|i| DeviceEntry {
            location_id: format!("L{i}"),
            facility_id: format!("F{i}"),
            kind: location_kind(i),
        })
        .collect();
    Arc::new(FacilityDirectory::new(entries))
}

fn engine(config: &Config, locations: usize) -> (Ingestor, Arc<TagRegistry>, Arc<Metrics>) {
    let registry = Arc::new(TagRegistry::new());
    let metrics = Arc::new(Metrics::new());
    let ingestor = Ingestor::new(config, registry.clone(), directory(locations), metrics.clone(), None);
    (ingestor, registry, metrics)
}

#[test]
fn test_snapshots_never_observe_partial_updates() {
    // Every conflicting read moves the tag
    let config = Config::from_toml_str(
        "[mobility]\nthreshold = 0.0\nholdoff_ms = 0\nslope = 0.0\n",
        "engine.toml",
    )
    .unwrap();
    let (ingestor, registry, _metrics) = engine(&config, 10);

    let clock = AtomicU64::new(T0);
    let writers_done = AtomicBool::new(false);
    let snapshots_taken = AtomicU64::new(0);

    std::thread::scope(|s| {
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let ingestor = ingestor.clone();
                let clock = &clock;
                s.spawn(move || {
                    for i in 0..250 {
                        let tag = format!("T{:03}", (w * 250 + i) % 100);
                        let location = format!("L{}", (w + i * 3) % 10);
                        let at = clock.fetch_add(1, Ordering::SeqCst);
                        ingestor.ingest(&ReadEvent::new(&tag, &location, at, 0.9));
                    }
                })
            })
            .collect();

        s.spawn(|| {
            while !writers_done.load(Ordering::SeqCst) {
                for tag in registry.snapshot() {
                    let location = tag.location_id().unwrap();
                    let index: usize = location[1..].parse().unwrap();
                    assert_eq!(tag.facility_id(), Some(format!("F{index}").as_str()));
                    assert_eq!(tag.location_kind(), location_kind(index));
                    assert_ne!(tag.previous_location_id(), Some(location));
                    assert!(tag.last_location_change_at() <= tag.last_seen_at());
                    assert!(tag.first_seen_at() <= tag.last_seen_at());
                    assert_eq!(tag.lifecycle(), LifecycleState::Present);
                }
                snapshots_taken.fetch_add(1, Ordering::SeqCst);
            }
        });

        for writer in writers {
            writer.join().unwrap();
        }
        writers_done.store(true, Ordering::SeqCst);
    });

    assert!(snapshots_taken.load(Ordering::SeqCst) >= 1);
    assert_eq!(registry.len(), 100);
    let ids: Vec<String> = registry.snapshot().iter().map(|t| t.id().to_string()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn test_departure_and_age_out_timeline() {
    let config = Config::from_toml_str(
        "[lifecycle]\ncheck_interval_secs = 30\ndeparted_threshold_secs = 120\nage_out_hours = 1\n",
        "engine.toml",
    )
    .unwrap();
    let (ingestor, registry, metrics) = engine(&config, 2);
    let sweeper = Sweeper::new(registry.clone(), metrics, LifecyclePolicy::from_config(&config), None);

    // L0 is an exit reader, L1 a point-of-sale reader
    ingestor.ingest(&ReadEvent::new("door", "L0", T0, 0.9));
    ingestor.ingest(&ReadEvent::new("till", "L1", T0, 0.9));

    assert!(sweeper.sweep(T0 + 100_000).is_empty());

    let report = sweeper.sweep(T0 + 121_000);
    assert_eq!(report.exiting, 2);
    assert_eq!(registry.get("door").unwrap().lifecycle(), LifecycleState::Exiting);

    let report = sweeper.sweep(T0 + 151_000);
    assert_eq!(report.departed, 2);
    assert_eq!(registry.get("door").unwrap().lifecycle(), LifecycleState::DepartedExit);
    assert_eq!(registry.get("till").unwrap().lifecycle(), LifecycleState::DepartedPos);

    // A later sweep at the same time changes nothing
    assert!(sweeper.sweep(T0 + 151_000).is_empty());

    // The till tag comes back before age-out
    let outcome = ingestor.ingest(&ReadEvent::new("till", "L1", T0 + 200_000, 0.9));
    assert_eq!(outcome.effect, ReadEffect::Refreshed);
    assert_eq!(outcome.returned_from, Some(LifecycleState::DepartedPos));

    let report = sweeper.sweep(T0 + 3_601_000);
    assert_eq!(report.evicted, 1);
    assert!(registry.get("door").is_none());
    assert_eq!(registry.get("till").unwrap().lifecycle(), LifecycleState::DepartedPos);

    // Evicted tags start over as first sightings
    let outcome = ingestor.ingest(&ReadEvent::new("door", "L0", T0 + 3_700_000, 0.9));
    assert_eq!(outcome.effect, ReadEffect::Created);
    assert_eq!(registry.get("door").unwrap().first_seen_at(), T0 + 3_700_000);
}

#[test]
fn test_inventory_reflects_ingested_reads() {
    let config = Config::default();
    let (ingestor, registry, metrics) = engine(&config, 2);
    let inventory = InventoryService::new(registry.clone(), metrics, "dc-01");

    let counts = ingestor.ingest_batch(&[
        ReadEvent::new("A", "L0", T0, 0.9),
        ReadEvent::new("B", "L1", T0, 0.9),
        ReadEvent::new("B", "L1", T0, 0.9),
        ReadEvent::new("", "L1", T0, 0.9),
        ReadEvent::new("C", "unmapped", T0, 0.9),
    ]);
    assert_eq!(counts.accepted, 3);
    assert_eq!(counts.unchanged, 1);
    assert_eq!(counts.invalid, 1);

    let records = inventory.raw_inventory().unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C"]);

    let json: serde_json::Value = serde_json::from_slice(&inventory.raw_inventory_json().unwrap()).unwrap();
    assert_eq!(json[0]["facilityID"], "F0");
    assert!(json[2]["facilityID"].is_null());
    assert_eq!(json[2]["locationID"], "unmapped");

    let summary = inventory.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.by_state.present, 3);
}
