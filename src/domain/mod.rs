//! Domain models - tag state and read events
//!
//! This module contains the canonical data types used throughout the system:
//! - `TagState` - authoritative per-tag location and lifecycle state
//! - `TagRecord` - JSON form of a tag served by the query surface
//! - `ReadEvent` - inbound tag read from a reader/antenna
//! - `LifecycleState` - closed set of lifecycle states

pub mod tag;
pub mod types;

pub use tag::{LifecycleState, TagRecord, TagState};
pub use types::{epoch_ms, DeviceEntry, LocationKind, ReadEvent, ResolvedRead, TimestampSource};
