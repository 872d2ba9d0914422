//! Time-driven lifecycle transitions
//!
//! With `elapsed = now - last_seen_at`, `D` the departed threshold, `C` the
//! check interval and `A` the age-out window:
//!
//! ```text
//! elapsed > A      -> evict
//! elapsed > D + C  -> DepartedExit | DepartedPos (by location kind)
//! elapsed > D      -> Exiting
//! otherwise        -> unchanged
//! ```
//!
//! The target is a function of elapsed time only, so a late sweep lands on the
//! right state directly and a repeated sweep at the same `now` changes nothing.
//! Sweeps never move a tag backwards; only a read returns it to `Present`.

use crate::domain::tag::{LifecycleState, TagState};
use crate::infra::config::Config;

/// Lifecycle timing, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub check_interval_ms: u64,
    pub departed_threshold_ms: u64,
    pub age_out_ms: u64,
}

impl LifecyclePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval_ms: config.check_interval_secs().saturating_mul(1000),
            departed_threshold_ms: config.departed_threshold_secs().saturating_mul(1000),
            age_out_ms: config.age_out_hours().saturating_mul(3_600_000),
        }
    }

    /// Silence after which an exiting tag is declared departed
    #[inline]
    pub fn departure_ms(&self) -> u64 {
        self.departed_threshold_ms.saturating_add(self.check_interval_ms)
    }

    /// Outcome for one tag at `now`
    pub fn step(&self, tag: &TagState, now: u64) -> LifecycleStep {
        let elapsed = now.saturating_sub(tag.last_seen_at);

        if elapsed > self.age_out_ms {
            return LifecycleStep::Evict;
        }

        let target = if elapsed > self.departure_ms() {
            LifecycleState::departed_for(tag.location_kind)
        } else if elapsed > self.departed_threshold_ms {
            LifecycleState::Exiting
        } else {
            return LifecycleStep::Keep;
        };

        // Unknown only exists inside a single upsert; it can be evicted but never promoted
        if tag.lifecycle == LifecycleState::Unknown || target.rank() <= tag.lifecycle.rank() {
            LifecycleStep::Keep
        } else {
            LifecycleStep::Transition(target)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStep {
    Keep,
    Transition(LifecycleState),
    Evict,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::LocationKind;

    fn policy() -> LifecyclePolicy {
        LifecyclePolicy {
            check_interval_ms: 30_000,
            departed_threshold_ms: 120_000,
            age_out_ms: 24 * 3_600_000,
        }
    }

    fn present(kind: LocationKind) -> TagState {
        let mut tag = TagState::unknown("A", 0);
        tag.location_id = "L1".to_string();
        tag.location_kind = kind;
        tag.lifecycle = LifecycleState::Present;
        tag
    }

    #[test]
    fn test_departure_timing() {
        let p = policy();
        let tag = present(LocationKind::Pos);
        assert_eq!(p.step(&tag, 100_000), LifecycleStep::Keep);
        assert_eq!(p.step(&tag, 140_000), LifecycleStep::Transition(LifecycleState::Exiting));
        assert_eq!(p.step(&tag, 200_000), LifecycleStep::Transition(LifecycleState::DepartedPos));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let p = policy();
        let tag = present(LocationKind::Pos);
        assert_eq!(p.step(&tag, 120_000), LifecycleStep::Keep);
        assert_eq!(p.step(&tag, 120_001), LifecycleStep::Transition(LifecycleState::Exiting));

        let mut exiting = tag.clone();
        exiting.lifecycle = LifecycleState::Exiting;
        assert_eq!(p.step(&exiting, 150_000), LifecycleStep::Keep);
        assert_eq!(
            p.step(&exiting, 150_001),
            LifecycleStep::Transition(LifecycleState::DepartedPos)
        );
    }

    #[test]
    fn test_exit_kind_departs_as_exit() {
        let tag = present(LocationKind::Exit);
        assert_eq!(
            policy().step(&tag, 200_000),
            LifecycleStep::Transition(LifecycleState::DepartedExit)
        );
    }

    #[test]
    fn test_late_sweep_jumps_to_departed() {
        // Present tag never observed as Exiting still lands on Departed
        let tag = present(LocationKind::Pos);
        assert_eq!(
            policy().step(&tag, 3_600_000),
            LifecycleStep::Transition(LifecycleState::DepartedPos)
        );
    }

    #[test]
    fn test_never_moves_backwards() {
        let mut tag = present(LocationKind::Pos);
        tag.lifecycle = LifecycleState::DepartedPos;
        assert_eq!(policy().step(&tag, 140_000), LifecycleStep::Keep);
        assert_eq!(policy().step(&tag, 200_000), LifecycleStep::Keep);
    }

    #[test]
    fn test_age_out_evicts_any_state() {
        let p = policy();
        for state in LifecycleState::ALL {
            let mut tag = present(LocationKind::Pos);
            tag.lifecycle = state;
            assert_eq!(p.step(&tag, p.age_out_ms + 1), LifecycleStep::Evict);
        }
    }

    #[test]
    fn test_future_last_seen_is_fresh() {
        let mut tag = present(LocationKind::Pos);
        tag.last_seen_at = 500_000;
        assert_eq!(policy().step(&tag, 0), LifecycleStep::Keep);
    }

    #[test]
    fn test_from_config() {
        let config = Config::default().with_lifecycle(30, 120, 24);
        let p = LifecyclePolicy::from_config(&config);
        assert_eq!(p, policy());
        assert_eq!(p.departure_ms(), 150_000);
    }

    #[test]
    fn test_from_config_saturates() {
        let config = Config::default().with_lifecycle(30, 120, u64::MAX);
        let p = LifecyclePolicy::from_config(&config);
        assert_eq!(p.age_out_ms, u64::MAX);
        assert_eq!(
            p.step(&present(LocationKind::Pos), 10_000_000),
            LifecycleStep::Transition(LifecycleState::DepartedPos)
        );
    }
}
