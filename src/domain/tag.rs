//! Per-tag state and its external record form

use crate::domain::types::LocationKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of a tag inside the tracked space
///
/// Transitions are driven only by the registry (reads) and the sweeper
/// (elapsed time); there is no public setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unknown,
    Present,
    Exiting,
    DepartedExit,
    DepartedPos,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 5] = [
        LifecycleState::Unknown,
        LifecycleState::Present,
        LifecycleState::Exiting,
        LifecycleState::DepartedExit,
        LifecycleState::DepartedPos,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unknown => "unknown",
            LifecycleState::Present => "present",
            LifecycleState::Exiting => "exiting",
            LifecycleState::DepartedExit => "departed_exit",
            LifecycleState::DepartedPos => "departed_pos",
        }
    }

    #[inline]
    pub fn is_departed(&self) -> bool {
        matches!(self, LifecycleState::DepartedExit | LifecycleState::DepartedPos)
    }

    /// Departed variant for a tag last committed at a location of `kind`
    #[inline]
    pub fn departed_for(kind: LocationKind) -> Self {
        match kind {
            LocationKind::Exit => LifecycleState::DepartedExit,
            LocationKind::Pos => LifecycleState::DepartedPos,
        }
    }

    /// Position along the time-driven path; the sweeper never moves a tag backwards
    #[inline]
    pub(crate) fn rank(&self) -> u8 {
        match self {
            LifecycleState::Unknown => 0,
            LifecycleState::Present => 1,
            LifecycleState::Exiting => 2,
            LifecycleState::DepartedExit | LifecycleState::DepartedPos => 3,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative state of one tag
///
/// Fields are crate-private: only the registry mutates them.
#[derive(Debug, Clone, PartialEq)]
pub struct TagState {
    pub(crate) id: String,
    pub(crate) location_id: String,
    pub(crate) facility_id: Option<String>,
    pub(crate) location_kind: LocationKind,
    pub(crate) previous_location_id: Option<String>,
    pub(crate) first_seen_at: u64,
    pub(crate) last_seen_at: u64,
    pub(crate) last_location_change_at: u64,
    pub(crate) lifecycle: LifecycleState,
    pub(crate) mobility_score: f64,
}

impl TagState {
    /// Seed for a never-seen tag; always replaced by the first applied read
    pub(crate) fn unknown(id: &str, first_seen_at: u64) -> Self {
        Self {
            id: id.to_string(),
            location_id: String::new(),
            facility_id: None,
            location_kind: LocationKind::Pos,
            previous_location_id: None,
            first_seen_at,
            last_seen_at: first_seen_at,
            last_location_change_at: first_seen_at,
            lifecycle: LifecycleState::Unknown,
            mobility_score: 0.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Committed location, None until the first read is applied
    pub fn location_id(&self) -> Option<&str> {
        (self.lifecycle != LifecycleState::Unknown).then_some(self.location_id.as_str())
    }

    pub fn facility_id(&self) -> Option<&str> {
        self.facility_id.as_deref()
    }

    pub fn location_kind(&self) -> LocationKind {
        self.location_kind
    }

    pub fn previous_location_id(&self) -> Option<&str> {
        self.previous_location_id.as_deref()
    }

    pub fn first_seen_at(&self) -> u64 {
        self.first_seen_at
    }

    pub fn last_seen_at(&self) -> u64 {
        self.last_seen_at
    }

    pub fn last_location_change_at(&self) -> u64 {
        self.last_location_change_at
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn mobility_score(&self) -> f64 {
        self.mobility_score
    }

    /// Render as the record served by the query surface
    ///
    /// Returns None if a timestamp is outside chrono's representable range.
    pub fn to_record(&self) -> Option<TagRecord> {
        Some(TagRecord {
            id: self.id.clone(),
            location_id: self.location_id.clone(),
            facility_id: self.facility_id.clone(),
            location_kind: self.location_kind,
            previous_location_id: self.previous_location_id.clone(),
            first_seen_at: to_datetime(self.first_seen_at)?,
            last_seen_at: to_datetime(self.last_seen_at)?,
            last_location_change_at: to_datetime(self.last_location_change_at)?,
            lifecycle_state: self.lifecycle,
            mobility_score: self.mobility_score,
        })
    }
}

fn to_datetime(epoch_ms: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(i64::try_from(epoch_ms).ok()?)
}

/// External JSON form of a tag (`GET /inventory/raw`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub id: String,
    #[serde(rename = "locationID")]
    pub location_id: String,
    #[serde(rename = "facilityID")]
    pub facility_id: Option<String>,
    pub location_kind: LocationKind,
    #[serde(rename = "previousLocationID")]
    pub previous_location_id: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_location_change_at: DateTime<Utc>,
    pub lifecycle_state: LifecycleState,
    pub mobility_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_departed_for_kind() {
        assert_eq!(LifecycleState::departed_for(LocationKind::Exit), LifecycleState::DepartedExit);
        assert_eq!(LifecycleState::departed_for(LocationKind::Pos), LifecycleState::DepartedPos);
        assert!(LifecycleState::DepartedExit.is_departed());
        assert!(!LifecycleState::Exiting.is_departed());
    }

    #[test]
    fn test_unknown_has_no_location() {
        let tag = TagState::unknown("A", 1_000);
        assert_eq!(tag.location_id(), None);
        assert_eq!(tag.lifecycle(), LifecycleState::Unknown);
    }

    #[test]
    fn test_record_serialization() {
        let mut tag = TagState::unknown("303402662C3A5F904C19939D", 1767617600000);
        tag.location_id = "RSP-150000-0".to_string();
        tag.facility_id = Some("Front".to_string());
        tag.lifecycle = LifecycleState::DepartedPos;

        let record = tag.to_record().unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "303402662C3A5F904C19939D");
        assert_eq!(json["locationID"], "RSP-150000-0");
        assert_eq!(json["facilityID"], "Front");
        assert_eq!(json["lifecycleState"], "departed_pos");
        assert_eq!(json["locationKind"], "pos");
        assert!(json["previousLocationID"].is_null());
        assert!(json["lastSeenAt"].as_str().unwrap().starts_with("2026-01-05T12:53:20"));
    }

    #[test]
    fn test_record_rejects_unrepresentable_time() {
        let tag = TagState::unknown("A", u64::MAX);
        assert!(tag.to_record().is_none());
    }
}
