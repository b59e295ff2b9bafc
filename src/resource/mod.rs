//! Resource abstraction layer
//!
//! This module provides a data-driven approach to inventorying GCP resources.
//! Resource definitions are loaded from JSON files at compile time, so a single
//! generic pipeline serves every resource type.
//!
//! # Architecture
//!
//! - [`registry`] - Loads resource definitions (listing, targets, table layout) from embedded JSON
//! - [`normalize`] - Turns raw provider records into typed inventory rows
//! - [`source`] - The paginated provider boundary the scanner reads from
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `storage.json` - Cloud Storage buckets
//! - `compute.json` - Compute Engine instances
//! - `sql.json` - Cloud SQL instances
//! - `functions.json` - Cloud Functions
//! - `bigtable.json` - Bigtable tables

pub mod normalize;
pub mod registry;
pub mod source;

pub use normalize::{lookup, normalize, FieldValue, InventoryRow};
pub use registry::*;
pub use source::{Page, ResourceSource};
