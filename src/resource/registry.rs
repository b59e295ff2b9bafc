//! Resource Registry - Load inventory definitions from JSON
//!
//! Every resource type the inventory knows about is declared in an embedded JSON file:
//! where to list it, how to find its scan targets, which table it lands in and how each
//! column is read out of a provider record. The pipeline itself is the same for all of them.

use crate::error::ConfigError;
use crate::scan::ScanOptions;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Embedded resource JSON files (compiled into the binary), in default run order
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/storage.json"),
    include_str!("../resources/compute.json"),
    include_str!("../resources/sql.json"),
    include_str!("../resources/functions.json"),
    include_str!("../resources/bigtable.json"),
];

/// GCP API family a resource is listed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Compute,
    Storage,
    Sqladmin,
    Cloudfunctions,
    Bigtableadmin,
}

/// How the scan targets of a resource type are discovered
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum TargetScope {
    /// Project-wide listing, a single `global` target
    Global,
    /// One target per Compute Engine region
    Regions,
    /// One target per Compute Engine zone
    Zones,
    /// Targets read from a listing endpoint of the resource's own service
    Listed {
        path: String,
        response_path: String,
        id_field: String,
        /// Whether target ids are locations the region filter applies to
        #[serde(default)]
        regional: bool,
    },
}

impl TargetScope {
    /// Whether a region filter is meaningful for these targets
    pub fn is_regional(&self) -> bool {
        match self {
            TargetScope::Global => false,
            TargetScope::Regions | TargetScope::Zones => true,
            TargetScope::Listed { regional, .. } => *regional,
        }
    }
}

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Text,
    Integer,
    Boolean,
}

/// Value reshaping applied after extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    #[default]
    None,
    /// Last path segment of a resource URL
    ShortName,
    /// String array joined with commas
    Join,
    /// Number of elements of an array or object
    Count,
    /// Object rendered as sorted `key=value` pairs
    Labels,
    /// Raw JSON text
    Json,
}

/// Column definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub column: String,
    pub json_path: String,
    #[serde(default)]
    pub kind: ColumnKind,
    #[serde(default)]
    pub transform: Transform,
}

/// Natural key column of a resource table
#[derive(Debug, Clone, Deserialize)]
pub struct KeyDef {
    pub column: String,
    pub json_path: String,
}

/// Page size query parameter
#[derive(Debug, Clone, Deserialize)]
pub struct PageSizeDef {
    pub param: String,
    pub value: u32,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub key: String,
    pub display_name: String,
    pub service: Service,
    /// Path below the service endpoint; `{project}` and `{target}` are substituted
    pub list_path: String,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub page_size: Option<PageSizeDef>,
    pub response_path: String,
    pub targets: TargetScope,
    pub table: String,
    pub natural_key: KeyDef,
    pub columns: Vec<ColumnDef>,
}

impl ResourceDef {
    /// Scan options for this resource type, derived from the run-wide options.
    /// Targets that are not locations ignore the region filter.
    pub fn scan_options(&self, base: &ScanOptions) -> ScanOptions {
        let mut options = base.clone();
        if !self.targets.is_regional() {
            options.target_filter.clear();
        }
        options
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
struct ResourceFile {
    #[serde(default)]
    resources: Vec<ResourceDef>,
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<Vec<ResourceDef>> = OnceLock::new();

/// Get the resource registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static [ResourceDef] {
    REGISTRY.get_or_init(|| {
        let mut all = Vec::new();

        for content in RESOURCE_FILES {
            let partial: ResourceFile = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {}", e));
            all.extend(partial.resources);
        }

        all
    })
}

/// Get a resource definition by key
pub fn get_resource(key: &str) -> Option<&'static ResourceDef> {
    get_registry().iter().find(|def| def.key == key)
}

/// Get all resource keys in default run order
pub fn get_all_resource_keys() -> Vec<&'static str> {
    get_registry().iter().map(|def| def.key.as_str()).collect()
}

/// Resolve a selection of resource keys; an empty selection means every registered type
pub fn resolve_resources(keys: &[String]) -> Result<Vec<Arc<ResourceDef>>, ConfigError> {
    if keys.is_empty() {
        return Ok(get_registry().iter().cloned().map(Arc::new).collect());
    }

    keys.iter()
        .map(|key| {
            get_resource(key)
                .cloned()
                .map(Arc::new)
                .ok_or_else(|| ConfigError::UnknownResource(key.clone()))
        })
        .collect()
}
