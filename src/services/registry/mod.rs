//! Tag registry: sole owner and mutator of tag state
//!
//! State lives in a fixed set of shards, each a `parking_lot::Mutex` around a
//! hash map. A tag id always hashes to the same shard, so every mutation of one
//! tag is serialized while unrelated tags rarely contend.
//!
//! Every mutation is computed on a copy and written back with a single
//! assignment: a tag is either fully updated or left untouched.


use crate::domain::tag::{LifecycleState, TagState};
use crate::domain::types::ResolvedRead;
use crate::services::lifecycle::{LifecyclePolicy, LifecycleStep};
use crate::services::mobility::{evaluate, MobilityInput, MobilityProfile, MobilityReason};
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::Serialize;
use std::hash::BuildHasher;

/// Number of shards used by `TagRegistry::new`
pub const DEFAULT_SHARDS: usize = 32;

/// Weight of a refresh read in the smoothed mobility score
const SCORE_SMOOTHING: f64 = 0.3;

/// What a single read did to the registry
#[derive(Debug, Clone, PartialEq)]
pub enum ReadEffect {
    /// First read of an unseen tag
    Created,
    /// Read at the committed location
    Refreshed,
    /// Committed to a new location
    Moved { from: String },
    /// Committed back to the location held before the current one
    Returned { from: String },
    /// Location change rejected; recency still refreshed
    Held(MobilityReason),
    /// Older than the recorded `last_seen_at`; nothing changed
    Stale,
    /// Same timestamp and location as the last applied read; nothing changed
    Duplicate,
    /// Missing tag or location, or unusable confidence; never reached a tag
    Invalid,
}

impl ReadEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadEffect::Created => "created",
            ReadEffect::Refreshed => "refreshed",
            ReadEffect::Moved { .. } => "moved",
            ReadEffect::Returned { .. } => "returned",
            ReadEffect::Held(_) => "held",
            ReadEffect::Stale => "stale",
            ReadEffect::Duplicate => "duplicate",
            ReadEffect::Invalid => "invalid",
        }
    }
}

/// Classification of one read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub effect: ReadEffect,
    /// Set when the read brought an exiting or departed tag back to present
    pub returned_from: Option<LifecycleState>,
}

impl ReadOutcome {
    pub(crate) fn unchanged(effect: ReadEffect) -> Self {
        Self { effect, returned_from: None }
    }

    /// Whether the registry state changed
    #[inline]
    pub fn mutated(&self) -> bool {
        !matches!(self.effect, ReadEffect::Stale | ReadEffect::Duplicate | ReadEffect::Invalid)
    }
}

/// One lifecycle change made by a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepTransition {
    pub tag_id: String,
    pub location_id: String,
    pub facility_id: Option<String>,
    pub from: LifecycleState,
    /// None when the tag was evicted
    pub to: Option<LifecycleState>,
    pub last_seen_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub exiting: usize,
    pub departed: usize,
    pub evicted: usize,
    pub transitions: Vec<SweepTransition>,
}

impl SweepReport {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    fn record(&mut self, tag: &TagState, to: Option<LifecycleState>) {
        match to {
            Some(LifecycleState::Exiting) => self.exiting += 1,
            Some(state) if state.is_departed() => self.departed += 1,
            Some(_) => {}
            None => self.evicted += 1,
        }
        self.transitions.push(SweepTransition {
            tag_id: tag.id.clone(),
            location_id: tag.location_id.clone(),
            facility_id: tag.facility_id.clone(),
            from: tag.lifecycle,
            to,
            last_seen_at: tag.last_seen_at,
        });
    }
}

/// Number of tags per lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCounts {
    pub present: usize,
    pub exiting: usize,
    pub departed_exit: usize,
    pub departed_pos: usize,
}

impl StateCounts {
    fn add(&mut self, state: LifecycleState) {
        match state {
            LifecycleState::Present => self.present += 1,
            LifecycleState::Exiting => self.exiting += 1,
            LifecycleState::DepartedExit => self.departed_exit += 1,
            LifecycleState::DepartedPos => self.departed_pos += 1,
            LifecycleState::Unknown => {}
        }
    }

    pub fn total(&self) -> usize {
        self.present + self.exiting + self.departed_exit + self.departed_pos
    }
}

type Shard = Mutex<FxHashMap<String, TagState>>;

pub struct TagRegistry {
    shards: Box<[Shard]>,
    hasher: FxBuildHasher,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1)).map(|_| Mutex::new(FxHashMap::default())).collect();
        Self { shards, hasher: FxBuildHasher }
    }

    #[inline]
    fn shard(&self, tag_id: &str) -> &Shard {
        let idx = self.hasher.hash_one(tag_id) as usize % self.shards.len();
        &self.shards[idx]
    }

    /// Apply one resolved read
    ///
    /// A read older than the tag's `last_seen_at` is a no-op, as is a repeat of
    /// the last applied or held read. Anything else refreshes recency and returns the
    /// tag to `Present`; the mobility profile decides whether the location moves.
    pub fn upsert_read(&self, read: &ResolvedRead, profile: &MobilityProfile) -> ReadOutcome {
        let mut shard = self.shard(&read.tag_id).lock();

        if let Some(tag) = shard.get_mut(&read.tag_id) {
            if read.at < tag.last_seen_at {
                return ReadOutcome::unchanged(ReadEffect::Stale);
            }
            if read.at == tag.last_seen_at && tag.location_id == read.location_id {
                return ReadOutcome::unchanged(ReadEffect::Duplicate);
            }
            let (next, outcome) = apply_read(tag, read, profile);
            // A replayed held read leaves the tag exactly as it was
            if next == *tag {
                return ReadOutcome::unchanged(ReadEffect::Duplicate);
            }
            *tag = next;
            return outcome;
        }

        let seed = TagState::unknown(&read.tag_id, read.at);
        let (next, outcome) = apply_read(&seed, read, profile);
        shard.insert(read.tag_id.clone(), next);
        outcome
    }

    /// Advance every tag's lifecycle to where `now` puts it and evict aged-out tags
    pub fn sweep_once(&self, now: u64, policy: &LifecyclePolicy) -> SweepReport {
        let mut report = SweepReport::default();
        for shard in self.shards.iter() {
            let mut tags = shard.lock();
            tags.retain(|_, tag| match policy.step(tag, now) {
                LifecycleStep::Keep => true,
                LifecycleStep::Transition(to) => {
                    report.record(tag, Some(to));
                    tag.lifecycle = to;
                    true
                }
                LifecycleStep::Evict => {
                    report.record(tag, None);
                    false
                }
            });
        }
        report
    }

    /// Copy of every tag, sorted by id
    ///
    /// Each tag is copied under its shard lock, so every record is internally
    /// consistent. Shards are visited one after another.
    pub fn snapshot(&self) -> Vec<TagState> {
        let mut tags = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            tags.extend(shard.lock().values().cloned());
        }
        tags.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        tags
    }

    pub fn get(&self, tag_id: &str) -> Option<TagState> {
        self.shard(tag_id).lock().get(tag_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts_by_state(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for shard in self.shards.iter() {
            for tag in shard.lock().values() {
                counts.add(tag.lifecycle);
            }
        }
        counts
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Next state of `tag` after `read`; never touches the registry
fn apply_read(tag: &TagState, read: &ResolvedRead, profile: &MobilityProfile) -> (TagState, ReadOutcome) {
    let decision = evaluate(
        &MobilityInput {
            current_location: tag.location_id(),
            current_facility: tag.facility_id(),
            previous_location: tag.previous_location_id(),
            last_location_change_at: tag.last_location_change_at,
            candidate_location: &read.location_id,
            candidate_facility: read.facility_id.as_deref(),
            confidence: read.confidence,
            now: read.at,
        },
        profile,
    );

    let returned_from = matches!(
        tag.lifecycle,
        LifecycleState::Exiting | LifecycleState::DepartedExit | LifecycleState::DepartedPos
    )
    .then_some(tag.lifecycle);

    let mut next = tag.clone();
    next.last_seen_at = read.at;
    next.lifecycle = LifecycleState::Present;

    let effect = match decision.reason {
        MobilityReason::FirstSighting => {
            commit_location(&mut next, read);
            ReadEffect::Created
        }
        MobilityReason::Refresh => {
            next.mobility_score =
                next.mobility_score * (1.0 - SCORE_SMOOTHING) + read.confidence * SCORE_SMOOTHING;
            if read.facility_id.is_some() {
                next.facility_id = read.facility_id.clone();
                next.location_kind = read.location_kind;
            }
            ReadEffect::Refreshed
        }
        MobilityReason::Moved | MobilityReason::Returned => {
            let from = tag.location_id.clone();
            next.previous_location_id = Some(from.clone());
            commit_location(&mut next, read);
            if decision.reason == MobilityReason::Returned {
                ReadEffect::Returned { from }
            } else {
                ReadEffect::Moved { from }
            }
        }
        reason @ (MobilityReason::HeldOff | MobilityReason::BelowThreshold) => ReadEffect::Held(reason),
    };

    (next, ReadOutcome { effect, returned_from })
}

fn commit_location(tag: &mut TagState, read: &ResolvedRead) {
    tag.location_id = read.location_id.clone();
    tag.facility_id = read.facility_id.clone();
    tag.location_kind = read.location_kind;
    tag.last_location_change_at = read.at;
    tag.mobility_score = read.confidence;
}
