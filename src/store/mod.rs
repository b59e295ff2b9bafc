//! Inventory sinks
//!
//! A sink receives the full [`ScanResult`] of one resource type and makes it durable
//! as a unit.
//!
//! - [`sql`] - Transactional upsert into Postgres or SQLite
//! - [`snapshot`] - Atomic JSON document per resource type

pub mod snapshot;
pub mod sql;

pub use snapshot::SnapshotWriter;
pub use sql::SqlStore;

use crate::error::PersistenceError;
use crate::resource::{InventoryRow, ResourceDef};
use crate::scan::ScanResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Destination for the rows of one resource type
#[async_trait]
pub trait InventorySink: Send + Sync {
    /// Short name used in logs and the run summary
    fn name(&self) -> &str;

    /// Write one resource type's result. Either all rows become visible or none do.
    /// Returns the number of rows written.
    async fn persist(
        &self,
        def: &ResourceDef,
        result: &ScanResult<InventoryRow>,
        cancel: &CancellationToken,
    ) -> Result<usize, PersistenceError>;
}
