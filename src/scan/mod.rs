//! Multi-target scanning
//!
//! - [`target`] - Scan targets and region filtering
//! - [`options`] - Validated scan configuration
//! - [`reader`] - Lazy, retrying page reader for one target
//! - [`scanner`] - Bounded fan-out over targets with per-target failure isolation
//! - [`result`] - Collected rows and the per-target failure ledger

pub mod options;
pub mod reader;
pub mod result;
pub mod scanner;
pub mod target;

pub use options::ScanOptions;
pub use reader::{pages, records, RetryPolicy};
pub use result::{ScanResult, TargetFailure};
pub use scanner::{scan, RowSink};
pub use target::ScanTarget;
