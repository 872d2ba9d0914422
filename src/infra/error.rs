//! Error types at the library seams

use thiserror::Error;

/// Rejected configuration; fatal at startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} is too large to express in milliseconds")]
    TooLarge { field: &'static str },

    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidNumber { field: &'static str, value: f64 },

    #[error("age-out window ({age_out_secs}s) must exceed departed threshold plus check interval ({departure_secs}s)")]
    AgeOutTooShort { age_out_secs: u64, departure_secs: u64 },

    #[error("mqtt.topics must list at least one topic when mqtt is enabled")]
    NoTopics,

    #[error("duplicate location {0} in directory.locations")]
    DuplicateLocation(String),
}

/// Errors surfaced by the engine to its callers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to serialize inventory: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("tag {tag_id} has a timestamp outside the representable range")]
    TimestampOutOfRange { tag_id: String },

    #[error("device catalog request failed: {0}")]
    Catalog(#[from] reqwest::Error),

    #[error("device catalog returned status {0}")]
    CatalogStatus(u16),
}

impl EngineError {
    /// Short machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Serialization(_) => "serialization_failed",
            EngineError::TimestampOutOfRange { .. } => "invalid_timestamp",
            EngineError::Catalog(_) | EngineError::CatalogStatus(_) => "catalog_unavailable",
        }
    }
}
