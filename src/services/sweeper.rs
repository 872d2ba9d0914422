//! Periodic lifecycle sweep
//!
//! Every check interval: stamp `now`, run one registry sweep, record counts
//! and publish departure and age-out events.

use crate::domain::types::epoch_ms;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::{EgressSender, InventoryEventKind, InventoryEventPayload};
use crate::services::lifecycle::LifecyclePolicy;
use crate::services::registry::{SweepReport, TagRegistry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub struct Sweeper {
    registry: Arc<TagRegistry>,
    metrics: Arc<Metrics>,
    policy: LifecyclePolicy,
    egress: Option<EgressSender>,
}

impl Sweeper {
    pub fn new(
        registry: Arc<TagRegistry>,
        metrics: Arc<Metrics>,
        policy: LifecyclePolicy,
        egress: Option<EgressSender>,
    ) -> Self {
        Self { registry, metrics, policy, egress }
    }

    /// One pass at `now` (epoch ms)
    pub fn sweep(&self, now: u64) -> SweepReport {
        let start = Instant::now();
        let report = self.registry.sweep_once(now, &self.policy);
        let duration_us = start.elapsed().as_micros() as u64;

        self.metrics.record_sweep(report.exiting, report.departed, report.evicted, duration_us);

        if report.is_empty() {
            debug!(duration_us = %duration_us, "sweep_idle");
        } else {
            info!(
                exiting = %report.exiting,
                departed = %report.departed,
                evicted = %report.evicted,
                duration_us = %duration_us,
                "sweep_completed"
            );
        }

        self.publish(&report);
        report
    }

    fn publish(&self, report: &SweepReport) {
        let Some(ref egress) = self.egress else {
            return;
        };
        for transition in &report.transitions {
            let kind = match transition.to {
                None => InventoryEventKind::AgedOut,
                Some(state) if state.is_departed() => InventoryEventKind::Departed,
                Some(_) => continue,
            };
            egress.send_inventory_event(
                InventoryEventPayload::new(
                    kind,
                    &transition.tag_id,
                    &transition.location_id,
                    transition.facility_id.as_deref(),
                    transition.last_seen_at,
                )
                .with_states(Some(transition.from), transition.to),
            );
        }
    }

    /// Sweep every check interval until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(self.policy.check_interval_ms.max(1));
        info!(
            check_interval_ms = %self.policy.check_interval_ms,
            departed_threshold_ms = %self.policy.departed_threshold_ms,
            age_out_ms = %self.policy.age_out_ms,
            "sweeper_started"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; nothing can be due yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(epoch_ms());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("sweeper_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tag::LifecycleState;
    use crate::domain::types::{LocationKind, ResolvedRead};
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};
    use crate::services::mobility::MobilityProfile;

    const HOUR_MS: u64 = 3_600_000;

    fn policy() -> LifecyclePolicy {
        LifecyclePolicy {
            check_interval_ms: 30_000,
            departed_threshold_ms: 120_000,
            age_out_ms: 24 * HOUR_MS,
        }
    }

    fn seed(registry: &TagRegistry, tag: &str, at: u64) {
        let read = ResolvedRead {
            tag_id: tag.to_string(),
            location_id: "L1".to_string(),
            facility_id: Some("Front".to_string()),
            location_kind: LocationKind::Pos,
            at,
            confidence: 0.9,
        };
        registry.upsert_read(&read, &MobilityProfile { threshold: 0.5, holdoff_ms: 0, slope: 0.0 });
    }

    #[test]
    fn test_sweep_records_metrics_and_events() {
        let registry = Arc::new(TagRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let (sender, mut rx) = create_egress_channel(16, "dc-01".to_string());
        let sweeper = Sweeper::new(registry.clone(), metrics.clone(), policy(), Some(sender));

        seed(&registry, "A", 0);
        seed(&registry, "B", 60_000);

        let report = sweeper.sweep(200_000);
        assert_eq!(report.departed, 1);
        assert_eq!(report.exiting, 1);

        let Ok(EgressMessage::InventoryEvent(payload)) = rx.try_recv() else {
            panic!("expected departed event");
        };
        assert_eq!(payload.t, InventoryEventKind::Departed);
        assert_eq!(payload.tag, "A");
        assert_eq!(payload.state, Some(LifecycleState::DepartedPos));
        // Exiting is not published
        assert!(rx.try_recv().is_err());

        sweeper.sweep(24 * HOUR_MS + 60_001);
        let Ok(EgressMessage::InventoryEvent(payload)) = rx.try_recv() else {
            panic!("expected aged_out event");
        };
        assert_eq!(payload.t, InventoryEventKind::AgedOut);
        assert_eq!(payload.state, None);
        assert_eq!(metrics.tags_evicted(), 2);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(TagRegistry::new());
        let sweeper = Sweeper::new(registry, Arc::new(Metrics::new()), policy(), None);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(sweeper.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
