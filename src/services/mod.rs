//! Services - inventory state and the logic that drives it
//!
//! - `registry` - Sharded tag registry, sole owner of tag state
//! - `mobility` - Decides whether a read moves a tag
//! - `lifecycle` - Time-driven lifecycle transitions
//! - `directory` - Location -> facility resolution
//! - `ingest` - Read validation, resolution and application
//! - `sweeper` - Periodic lifecycle sweep
//! - `inventory` - Snapshot and summary queries

pub mod directory;
pub mod ingest;
pub mod inventory;
pub mod lifecycle;
pub mod mobility;
pub mod registry;
pub mod sweeper;

// Re-export commonly used types
pub use directory::FacilityDirectory;
pub use ingest::{run_ingest_worker, Ingestor};
pub use inventory::InventoryService;
pub use lifecycle::LifecyclePolicy;
pub use mobility::MobilityProfile;
pub use registry::{ReadEffect, ReadOutcome, SweepReport, TagRegistry};
pub use sweeper::Sweeper;
