//! Scan results and the failure ledger

use super::ScanTarget;
use crate::error::TargetScanError;
use serde::{Serialize, Serializer};

/// One isolated target failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub target: ScanTarget,
    #[serde(serialize_with = "serialize_display")]
    pub error: TargetScanError,
}

fn serialize_display<S: Serializer>(error: &TargetScanError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Rows collected from every target of one resource type, plus the targets that failed.
/// Row order is arrival order and carries no meaning.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult<R> {
    pub rows: Vec<R>,
    pub failures: Vec<TargetFailure>,
    /// Targets dispatched after filtering
    pub targets_scanned: usize,
}

impl<R> Default for ScanResult<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            failures: Vec::new(),
            targets_scanned: 0,
        }
    }
}

impl<R> ScanResult<R> {
    /// True when no target failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ledger entry for a target, if it failed
    pub fn failure_for(&self, target: &str) -> Option<&TargetScanError> {
        self.failures
            .iter()
            .find(|f| f.target.as_str() == target)
            .map(|f| &f.error)
    }

    /// Ledger rendered as human-readable warnings
    pub fn warnings(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.target, f.error))
            .collect()
    }
}
