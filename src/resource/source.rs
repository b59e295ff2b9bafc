//! Provider boundary
//!
//! The pipeline sees the cloud provider only through [`ResourceSource`]: list the
//! targets of a resource type, then fetch its records one page at a time.

use super::registry::ResourceDef;
use crate::error::FetchError;
use crate::scan::ScanTarget;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// One page of raw records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub next_page_token: Option<String>,
}

impl Page {
    /// Split a list response into records (found at `response_path`) and the next page token
    pub fn from_response(mut response: Value, response_path: &str) -> Self {
        let next_page_token = response
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let records = extract_items(&mut response, response_path);

        Self {
            records,
            next_page_token,
        }
    }
}

/// Take the array at a dot-notation path; anything else yields no records
fn extract_items(response: &mut Value, path: &str) -> Vec<Value> {
    let mut current = response;

    if !path.is_empty() {
        for part in path.split('.') {
            current = match current.get_mut(part) {
                Some(v) => v,
                None => return vec![],
            };
        }
    }

    match current.take() {
        Value::Array(items) => items,
        _ => vec![],
    }
}

/// Paginated data source for inventory scans
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Project (or account) every row read from this source belongs to
    fn project_id(&self) -> &str;

    /// Enumerate the scan targets of a resource type. Stops requesting listing pages
    /// once `cancel` fires and returns [`FetchError::Cancelled`].
    async fn list_targets(
        &self,
        def: &ResourceDef,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScanTarget>, FetchError>;

    /// Fetch one page of records for a target; `None` requests the first page
    async fn fetch_page(
        &self,
        def: &ResourceDef,
        target: &ScanTarget,
        page_token: Option<&str>,
    ) -> Result<Page, FetchError>;
}
