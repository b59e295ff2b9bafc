//! Scan targets

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of the single target of project-wide resource types
pub const GLOBAL_TARGET: &str = "global";

/// One unit of parallel scan work: a region, a zone, a parent resource, or `global`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScanTarget(String);

impl ScanTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn global() -> Self {
        Self(GLOBAL_TARGET.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_TARGET
    }

    /// Region of a zone target ("us-central1-a" -> "us-central1", "us-central1-ai1a" ->
    /// "us-central1"); other targets are their own region.
    /// A zone is a region name, which ends in a digit, plus one more `-suffix`.
    pub fn region(&self) -> &str {
        match self.0.rsplit_once('-') {
            Some((region, suffix))
                if region.ends_with(|c: char| c.is_ascii_digit())
                    && !suffix.is_empty()
                    && suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) =>
            {
                region
            }
            _ => &self.0,
        }
    }

    /// Whether a target filter selects this target.
    /// An empty filter selects everything; a region in the filter selects its zones.
    pub fn matches(&self, filter: &BTreeSet<String>) -> bool {
        filter.is_empty()
            || self.is_global()
            || filter.contains(&self.0)
            || filter.contains(self.region())
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScanTarget {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ScanTarget {
    fn from(id: String) -> Self {
        Self(id)
    }
}
