//! JSON snapshot sink
//!
//! Writes `<dir>/<resource>_inventory.json` per resource type. The document is written
//! to a temporary file in the same directory and renamed over the previous snapshot,
//! so readers see either the old document or the new one.

use super::InventorySink;
use crate::error::PersistenceError;
use crate::resource::{InventoryRow, ResourceDef};
use crate::scan::ScanResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Snapshot document layout
#[derive(Debug, Serialize)]
struct SnapshotDocument<'a> {
    resource: &'a str,
    display_name: &'a str,
    generated_at: DateTime<Utc>,
    targets_scanned: usize,
    row_count: usize,
    warnings: Vec<String>,
    rows: &'a [InventoryRow],
}

/// Writes one snapshot file per resource type into a directory
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of a resource type's snapshot
    pub fn path_for(&self, def: &ResourceDef) -> PathBuf {
        self.dir.join(format!("{}_inventory.json", def.key))
    }

    /// Serialize the result and atomically replace the previous snapshot
    pub async fn write(
        &self,
        def: &ResourceDef,
        result: &ScanResult<InventoryRow>,
    ) -> Result<PathBuf, PersistenceError> {
        let document = SnapshotDocument {
            resource: &def.key,
            display_name: &def.display_name,
            generated_at: Utc::now(),
            targets_scanned: result.targets_scanned,
            row_count: result.rows.len(),
            warnings: result.warnings(),
            rows: &result.rows,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let dir = self.dir.clone();
        let path = self.path_for(def);
        let target = path.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        tracing::debug!(resource = %def.key, "snapshot written to {}", path.display());
        Ok(path)
    }
}

#[async_trait]
impl InventorySink for SnapshotWriter {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn persist(
        &self,
        def: &ResourceDef,
        result: &ScanResult<InventoryRow>,
        cancel: &CancellationToken,
    ) -> Result<usize, PersistenceError> {
        if cancel.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        self.write(def, result).await?;
        Ok(result.rows.len())
    }
}
