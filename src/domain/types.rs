//! Shared types for the inventory engine

use serde::{Deserialize, Deserializer, Serialize};
use smallvec::{smallvec, SmallVec};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Kind of reader a location belongs to
///
/// Decides which departed variant a tag ends up in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// Facility exit reader
    Exit,
    /// Regular positioning reader
    #[default]
    Pos,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Exit => "exit",
            LocationKind::Pos => "pos",
        }
    }
}

/// Which clock feeds a tag's `last_seen_at`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    /// Reader-local read timestamp (`observedAt`)
    #[default]
    Device,
    /// Gateway receipt timestamp
    Gateway,
}

impl TimestampSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampSource::Device => "device",
            TimestampSource::Gateway => "gateway",
        }
    }
}

/// One entry of the device catalog: a reader/antenna and where it sits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    #[serde(alias = "location_id", alias = "locationID")]
    pub location_id: String,
    #[serde(alias = "facility_id", alias = "facilityID")]
    pub facility_id: String,
    #[serde(default)]
    pub kind: LocationKind,
}

/// Inbound tag read as published by a reader
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadEvent {
    #[serde(rename = "tagID", alias = "tagId", alias = "epc")]
    pub tag_id: String,
    #[serde(rename = "locationID", alias = "locationId")]
    pub location_id: String,
    /// Reader-local timestamp, epoch milliseconds
    #[serde(deserialize_with = "deserialize_observed_at")]
    pub observed_at: u64,
    #[serde(default)]
    pub confidence: f64,
    /// Gateway receipt time, stamped on arrival (epoch ms)
    #[serde(skip)]
    pub received_at: u64,
}

impl ReadEvent {
    pub fn new(tag_id: &str, location_id: &str, observed_at: u64, confidence: f64) -> Self {
        Self {
            tag_id: tag_id.to_string(),
            location_id: location_id.to_string(),
            observed_at,
            confidence,
            received_at: observed_at,
        }
    }

    /// Timestamp used for recency, holdoff and departure math
    #[inline]
    pub fn effective_at(&self, source: TimestampSource) -> u64 {
        match source {
            TimestampSource::Device => self.observed_at,
            TimestampSource::Gateway => self.received_at,
        }
    }

    /// Whether the read carries enough to be applied at all
    pub fn is_well_formed(&self) -> bool {
        !self.tag_id.is_empty()
            && !self.location_id.is_empty()
            && self.confidence.is_finite()
            && self.confidence >= 0.0
    }
}

/// Read after facility resolution, ready for the registry
#[derive(Debug, Clone)]
pub struct ResolvedRead {
    pub tag_id: String,
    pub location_id: String,
    /// None when the directory does not know the location
    pub facility_id: Option<String>,
    pub location_kind: LocationKind,
    /// Effective timestamp (epoch ms)
    pub at: u64,
    pub confidence: f64,
}

/// A payload is either a single read or a batch
#[derive(Deserialize)]
#[serde(untagged)]
enum ReadPayload {
    One(ReadEvent),
    Many(Vec<ReadEvent>),
}

/// Parse a JSON read payload, stamping every read with the receipt time
pub fn parse_read_payload(
    json: &[u8],
    received_at: u64,
) -> Result<SmallVec<[ReadEvent; 4]>, serde_json::Error> {
    let mut reads: SmallVec<[ReadEvent; 4]> = match serde_json::from_slice(json)? {
        ReadPayload::One(read) => smallvec![read],
        ReadPayload::Many(reads) => SmallVec::from_vec(reads),
    };
    for read in &mut reads {
        read.received_at = received_at;
    }
    Ok(reads)
}

/// Parse RFC 3339 timestamp to epoch milliseconds
pub fn parse_iso_time(time_str: &str) -> Option<u64> {
    OffsetDateTime::parse(time_str, &Rfc3339)
        .ok()
        .and_then(|dt| u64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok())
}

/// `observedAt` may be epoch milliseconds or an RFC 3339 string
fn deserialize_observed_at<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct ObservedAtVisitor;

    impl<'de> Visitor<'de> for ObservedAtVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an RFC 3339 string or epoch milliseconds")
        }

        fn visit_str<E>(self, value: &str) -> Result<u64, E>
        where
            E: de::Error,
        {
            parse_iso_time(value)
                .ok_or_else(|| E::custom(format!("invalid timestamp: {value}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<u64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<u64, E>
        where
            E: de::Error,
        {
            u64::try_from(value).map_err(|_| E::custom("negative timestamp"))
        }

        fn visit_f64<E>(self, value: f64) -> Result<u64, E>
        where
            E: de::Error,
        {
            if value.is_finite() && value >= 0.0 {
                Ok(value as u64)
            } else {
                Err(E::custom("invalid timestamp"))
            }
        }
    }

    deserializer.deserialize_any(ObservedAtVisitor)
}
