//! Error taxonomy
//!
//! Errors are layered the same way the pipeline is: configuration problems stop a run
//! before it starts, discovery and persistence problems fail one resource type, and
//! target problems are recovered into the scan ledger.

use thiserror::Error;

/// Invalid scan or run configuration. Fatal before any work starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency limit must be greater than 0")]
    ConcurrencyLimit,

    #[error("concurrency limit {limit} exceeds the maximum of {max}")]
    ConcurrencyTooHigh { limit: usize, max: usize },

    #[error("max retries cannot be negative (got {0})")]
    NegativeRetries(i32),

    #[error("deadline must be set to a positive duration")]
    MissingDeadline,

    #[error("no GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project")]
    MissingProject,

    #[error("unknown resource type: {0}")]
    UnknownResource(String),

    #[error("nothing to write: database disabled and no snapshot directory given")]
    NoSink,
}

/// Error returned by a provider page or listing call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: throttling, server-side failures, dropped connections.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider error: {0}")]
    Permanent(String),

    #[error("request cancelled before it was sent")]
    Cancelled,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Target enumeration failed; no meaningful partial result exists.
#[derive(Error, Debug, Clone)]
#[error("failed to enumerate targets: {source}")]
pub struct DiscoveryError {
    #[from]
    pub source: FetchError,
}

/// A failure isolated to one scan target. Recorded in the ledger, never propagated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetScanError {
    #[error("page fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("scan task panicked: {0}")]
    Panicked(String),

    #[error("scan task was aborted by the runtime")]
    Aborted,

    #[error("scan cancelled before the target completed")]
    Cancelled,
}

/// Failure of a whole scan call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scan cancelled: deadline reached")]
    Cancelled,
}

/// Batch write failed; nothing from the batch is visible.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("row {key} failed to apply: {source}")]
    Row {
        key: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("persistence cancelled before the batch began")]
    Cancelled,
}

/// A resource type's pipeline failed. Sibling resource types are unaffected.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{resource}: {source}")]
    Discovery {
        resource: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("{resource}: {source}")]
    Scan {
        resource: String,
        #[source]
        source: ScanError,
    },

    #[error("{resource}: {source}")]
    Persistence {
        resource: String,
        #[source]
        source: PersistenceError,
    },

    #[error("{resource}: pipeline panicked: {message}")]
    Panicked { resource: String, message: String },
}

impl PipelineError {
    /// Resource type key the failure belongs to
    pub fn resource(&self) -> &str {
        match self {
            PipelineError::Discovery { resource, .. }
            | PipelineError::Scan { resource, .. }
            | PipelineError::Persistence { resource, .. }
            | PipelineError::Panicked { resource, .. } => resource,
        }
    }
}

/// Render a panic payload from a `JoinError` or `catch_unwind`
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
