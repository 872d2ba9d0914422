//! Mobility evaluation: should a fresh read replace a tag's committed location?
//!
//! Pure function over a synthetic timeline; no clocks, no locks.
//!
//! A conflicting read moves the tag only when both hold:
//! - at least `holdoff_ms` has passed since the last accepted move
//! - its confidence is strictly above the required bar, where the bar
//!   decays by `slope` per second spent at the current location
//!
//! Equal confidence keeps the current location.

use crate::infra::config::Config;

/// Tunable policy governing location changes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MobilityProfile {
    pub threshold: f64,
    pub holdoff_ms: u64,
    pub slope: f64,
}

impl MobilityProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.mobility_threshold(),
            holdoff_ms: config.mobility_holdoff_ms(),
            slope: config.mobility_slope(),
        }
    }

    /// Confidence a conflicting read must exceed after `dwell_ms` at the current location
    #[inline]
    pub fn required_confidence(&self, dwell_ms: u64) -> f64 {
        let dwell_secs = dwell_ms as f64 / 1000.0;
        (self.threshold - self.slope * dwell_secs).max(0.0)
    }
}

/// Everything the evaluator looks at for one read
#[derive(Debug, Clone, Copy)]
pub struct MobilityInput<'a> {
    /// None for a tag that has never been committed anywhere
    pub current_location: Option<&'a str>,
    pub current_facility: Option<&'a str>,
    pub previous_location: Option<&'a str>,
    pub last_location_change_at: u64,
    pub candidate_location: &'a str,
    pub candidate_facility: Option<&'a str>,
    pub confidence: f64,
    /// Effective timestamp of the read (epoch ms)
    pub now: u64,
}

/// Why the evaluator decided the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobilityReason {
    /// No committed location yet
    FirstSighting,
    /// Candidate is the committed location
    Refresh,
    /// Moved to a new location
    Moved,
    /// Moved back to the location held before the current one
    Returned,
    /// Rejected: last move too recent
    HeldOff,
    /// Rejected: confidence not above the bar
    BelowThreshold,
}

impl MobilityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MobilityReason::FirstSighting => "first_sighting",
            MobilityReason::Refresh => "refresh",
            MobilityReason::Moved => "moved",
            MobilityReason::Returned => "returned",
            MobilityReason::HeldOff => "held_off",
            MobilityReason::BelowThreshold => "below_threshold",
        }
    }

    /// Whether the candidate becomes (or stays) the committed location
    #[inline]
    pub fn is_accept(&self) -> bool {
        !matches!(self, MobilityReason::HeldOff | MobilityReason::BelowThreshold)
    }

    /// Whether an accepted decision commits a different location
    #[inline]
    pub fn is_move(&self) -> bool {
        matches!(self, MobilityReason::FirstSighting | MobilityReason::Moved | MobilityReason::Returned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MobilityDecision<'a> {
    pub accept: bool,
    pub reason: MobilityReason,
    /// Facility of the location that wins
    pub facility_id: Option<&'a str>,
}

impl<'a> MobilityDecision<'a> {
    fn accepted(reason: MobilityReason, facility_id: Option<&'a str>) -> Self {
        Self { accept: true, reason, facility_id }
    }

    fn rejected(reason: MobilityReason, facility_id: Option<&'a str>) -> Self {
        Self { accept: false, reason, facility_id }
    }
}

/// Decide whether `input.candidate_location` becomes the committed location
pub fn evaluate<'a>(input: &MobilityInput<'a>, profile: &MobilityProfile) -> MobilityDecision<'a> {
    let Some(current) = input.current_location else {
        return MobilityDecision::accepted(MobilityReason::FirstSighting, input.candidate_facility);
    };

    if current == input.candidate_location {
        // Directory may have learned the facility since the last commit
        let facility = input.candidate_facility.or(input.current_facility);
        return MobilityDecision::accepted(MobilityReason::Refresh, facility);
    }

    let dwell_ms = input.now.saturating_sub(input.last_location_change_at);
    if dwell_ms < profile.holdoff_ms {
        return MobilityDecision::rejected(MobilityReason::HeldOff, input.current_facility);
    }

    if input.confidence <= profile.required_confidence(dwell_ms) {
        return MobilityDecision::rejected(MobilityReason::BelowThreshold, input.current_facility);
    }

    let reason = if input.previous_location == Some(input.candidate_location) {
        MobilityReason::Returned
    } else {
        MobilityReason::Moved
    };
    MobilityDecision::accepted(reason, input.candidate_facility)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(threshold: f64, holdoff_ms: u64, slope: f64) -> MobilityProfile {
        MobilityProfile { threshold, holdoff_ms, slope }
    }

    fn input<'a>(candidate: &'a str, confidence: f64, last_change: u64, now: u64) -> MobilityInput<'a> {
        MobilityInput {
            current_location: Some("L1"),
            current_facility: Some("Front"),
            previous_location: Some("L0"),
            last_location_change_at: last_change,
            candidate_location: candidate,
            candidate_facility: Some("Back"),
            confidence,
            now,
        }
    }

    #[test]
    fn test_first_sighting_accepted() {
        let mut i = input("L2", 0.0, 0, 0);
        i.current_location = None;
        let decision = evaluate(&i, &profile(0.9, 5000, 0.0));
        assert!(decision.accept);
        assert_eq!(decision.reason, MobilityReason::FirstSighting);
        assert_eq!(decision.facility_id, Some("Back"));
    }

    #[test]
    fn test_same_location_always_accepted() {
        // Low confidence and inside holdoff still refreshes
        let decision = evaluate(&input("L1", 0.0, 1_000, 1_001), &profile(0.9, 5000, 0.0));
        assert!(decision.accept);
        assert_eq!(decision.reason, MobilityReason::Refresh);
    }

    #[test]
    fn test_debounce_holdoff() {
        let p = profile(0.5, 5000, 0.0);
        // Move committed at t=0; conflicting read at t=3s is held off
        let decision = evaluate(&input("L2", 0.9, 0, 3_000), &p);
        assert!(!decision.accept);
        assert_eq!(decision.reason, MobilityReason::HeldOff);
        assert_eq!(decision.facility_id, Some("Front"));

        // Same read at t=6s is accepted
        let decision = evaluate(&input("L2", 0.9, 0, 6_000), &p);
        assert!(decision.accept);
        assert_eq!(decision.reason, MobilityReason::Moved);
        assert_eq!(decision.facility_id, Some("Back"));
    }

    #[test]
    fn test_holdoff_boundary_is_inclusive() {
        let p = profile(0.5, 5000, 0.0);
        assert!(!evaluate(&input("L2", 0.9, 0, 4_999), &p).accept);
        assert!(evaluate(&input("L2", 0.9, 0, 5_000), &p).accept);
    }

    #[test]
    fn test_tie_favors_current_location() {
        let p = profile(0.5, 0, 0.0);
        let decision = evaluate(&input("L2", 0.5, 0, 10_000), &p);
        assert!(!decision.accept);
        assert_eq!(decision.reason, MobilityReason::BelowThreshold);
        assert!(evaluate(&input("L2", 0.500_001, 0, 10_000), &p).accept);
    }

    #[test]
    fn test_slope_lowers_bar_over_time() {
        // Bar = 0.8 - 0.01/s * dwell
        let p = profile(0.8, 0, 0.01);
        // After 10s the bar is 0.7
        assert!(!evaluate(&input("L2", 0.65, 0, 10_000), &p).accept);
        // After 30s the bar is 0.5
        assert!(evaluate(&input("L2", 0.65, 0, 30_000), &p).accept);
    }

    #[test]
    fn test_required_confidence_floors_at_zero() {
        let p = profile(0.5, 0, 1.0);
        assert_eq!(p.required_confidence(60_000), 0.0);
        // Zero confidence still cannot beat a zero bar
        assert!(!evaluate(&input("L2", 0.0, 0, 60_000), &p).accept);
        assert!(evaluate(&input("L2", 0.01, 0, 60_000), &p).accept);
    }

    #[test]
    fn test_return_to_previous_location() {
        let decision = evaluate(&input("L0", 0.9, 0, 10_000), &profile(0.5, 1000, 0.0));
        assert!(decision.accept);
        assert_eq!(decision.reason, MobilityReason::Returned);
        assert!(decision.reason.is_move());
    }

    #[test]
    fn test_clock_skew_before_last_change_is_held_off() {
        // A read stamped before the last move saturates to zero dwell
        let decision = evaluate(&input("L2", 0.9, 10_000, 5_000), &profile(0.5, 1000, 0.0));
        assert_eq!(decision.reason, MobilityReason::HeldOff);
    }
}
