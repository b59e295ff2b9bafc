//! cloudventory
//!
//! Inventories Google Cloud resources across regions and zones and upserts normalized
//! rows into a SQL database, with optional JSON snapshots.
//!
//! A run resolves the scan targets of each resource type, scans them in parallel behind
//! a concurrency limit, and hands the collected rows to the configured sinks. A target
//! that fails is recorded in the result's ledger instead of failing its siblings.

pub mod config;
pub mod error;
pub mod gcp;
pub mod inventory;
pub mod resource;
pub mod scan;
pub mod store;

/// Version injected at compile time via CLOUDVENTORY_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDVENTORY_VERSION") {
    Some(v) => v,
    None => "dev",
};
