//! Region Enumerator
//!
//! Lists the Compute Engine regions and zones visible to the project. These are the
//! scan targets of regional and zonal resource types.

use super::client::GcpClient;
use super::http::ApiError;
use crate::resource::{Page, Service};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Fetch every item of a paginated list endpoint.
/// No further page is requested once `cancel` fires.
pub(crate) async fn drain(
    client: &GcpClient,
    url: &str,
    response_path: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Value>, ApiError> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            tracing::debug!("listing of {} cancelled after {} items", url, all_items.len());
            return Err(ApiError::Cancelled);
        }

        let mut query = Vec::new();
        if let Some(token) = &page_token {
            query.push(("pageToken".to_string(), token.clone()));
        }

        let page = Page::from_response(client.get(url, &query).await?, response_path);
        all_items.extend(page.records);

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(all_items)
}

fn names(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.get("name").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect()
}

/// List all regions of the project
pub async fn list_regions(client: &GcpClient, cancel: &CancellationToken) -> Result<Vec<String>, ApiError> {
    let url = client.service_url(Service::Compute, "projects/{project}/regions", None);
    let regions = names(&drain(client, &url, "items", cancel).await?);
    tracing::info!("Loaded {} regions", regions.len());
    Ok(regions)
}

/// List all zones of the project
pub async fn list_zones(client: &GcpClient, cancel: &CancellationToken) -> Result<Vec<String>, ApiError> {
    let url = client.service_url(Service::Compute, "projects/{project}/zones", None);
    let zones = names(&drain(client, &url, "items", cancel).await?);
    tracing::info!("Loaded {} zones", zones.len());
    Ok(zones)
}
