//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality. Implements [`ResourceSource`] for the inventory pipeline.

use super::auth::GcpCredentials;
use super::http::{ApiError, GcpHttpClient};
use super::regions;
use crate::error::FetchError;
use crate::resource::normalize::extract_short_name;
use crate::resource::{lookup, Page, ResourceDef, ResourceSource, Service, TargetScope};
use crate::scan::ScanTarget;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Base URLs of the GCP services the inventory reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: String,
    pub storage: String,
    pub sqladmin: String,
    pub cloudfunctions: String,
    pub bigtableadmin: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: "https://compute.googleapis.com/compute/v1".to_string(),
            storage: "https://storage.googleapis.com/storage/v1".to_string(),
            sqladmin: "https://sqladmin.googleapis.com/v1".to_string(),
            cloudfunctions: "https://cloudfunctions.googleapis.com/v2".to_string(),
            bigtableadmin: "https://bigtableadmin.googleapis.com/v2".to_string(),
        }
    }
}

impl Endpoints {
    /// Serve every API from one host, keeping the per-service paths (emulators, tests)
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            compute: format!("{base}/compute/v1"),
            storage: format!("{base}/storage/v1"),
            sqladmin: format!("{base}/sqladmin/v1"),
            cloudfunctions: format!("{base}/cloudfunctions/v2"),
            bigtableadmin: format!("{base}/bigtableadmin/v2"),
        }
    }

    pub fn for_service(&self, service: Service) -> &str {
        match service {
            Service::Compute => &self.compute,
            Service::Storage => &self.storage,
            Service::Sqladmin => &self.sqladmin,
            Service::Cloudfunctions => &self.cloudfunctions,
            Service::Bigtableadmin => &self.bigtableadmin,
        }
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub endpoints: Endpoints,
}

impl GcpClient {
    /// Create a new GCP client
    pub fn new(project_id: &str, credentials: GcpCredentials) -> Result<Self, ApiError> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new()?,
            project_id: project_id.to_string(),
            endpoints: Endpoints::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, query: &[(String, String)]) -> Result<Value, ApiError> {
        let token = self.credentials.get_token().await?;
        self.http.get(url, query, &token).await
    }

    /// Build a service URL from a path template with `{project}` and `{target}` placeholders
    pub fn service_url(&self, service: Service, template: &str, target: Option<&ScanTarget>) -> String {
        let path = self.expand(template, target, true);
        format!(
            "{}/{}",
            self.endpoints.for_service(service).trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn expand(&self, template: &str, target: Option<&ScanTarget>, encode: bool) -> String {
        let (project, target) = if encode {
            (
                urlencoding::encode(&self.project_id).into_owned(),
                target.map(|t| urlencoding::encode(t.as_str()).into_owned()),
            )
        } else {
            (self.project_id.clone(), target.map(|t| t.to_string()))
        };

        let expanded = template.replace("{project}", &project);
        match target {
            Some(target) => expanded.replace("{target}", &target),
            None => expanded,
        }
    }

    /// Query parameters of one list call
    fn list_query(&self, def: &ResourceDef, target: &ScanTarget, page_token: Option<&str>) -> Vec<(String, String)> {
        // reqwest encodes query values itself
        let mut query: Vec<(String, String)> = def
            .query_params
            .iter()
            .map(|(k, v)| (k.clone(), self.expand(v, Some(target), false)))
            .collect();

        if let Some(page_size) = &def.page_size {
            query.push((page_size.param.clone(), page_size.value.to_string()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken".to_string(), token.to_string()));
        }

        query
    }

    /// Target ids read from a listing endpoint, across all pages
    async fn list_listed_targets(
        &self,
        service: Service,
        path: &str,
        response_path: &str,
        id_field: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScanTarget>, ApiError> {
        let url = self.service_url(service, path, None);
        let items = regions::drain(self, &url, response_path, cancel).await?;

        Ok(items
            .iter()
            .filter_map(|item| lookup(item, id_field).and_then(|v| v.as_str()))
            .map(|id| ScanTarget::new(extract_short_name(id)))
            .collect())
    }
}

#[async_trait]
impl ResourceSource for GcpClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_targets(
        &self,
        def: &ResourceDef,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScanTarget>, FetchError> {
        let targets = match &def.targets {
            TargetScope::Global => vec![ScanTarget::global()],
            TargetScope::Regions => regions::list_regions(self, cancel)
                .await?
                .into_iter()
                .map(ScanTarget::from)
                .collect(),
            TargetScope::Zones => regions::list_zones(self, cancel)
                .await?
                .into_iter()
                .map(ScanTarget::from)
                .collect(),
            TargetScope::Listed {
                path,
                response_path,
                id_field,
                ..
            } => {
                self.list_listed_targets(def.service, path, response_path, id_field, cancel)
                    .await?
            }
        };

        tracing::debug!(resource = %def.key, "{} targets", targets.len());
        Ok(targets)
    }

    async fn fetch_page(
        &self,
        def: &ResourceDef,
        target: &ScanTarget,
        page_token: Option<&str>,
    ) -> Result<Page, FetchError> {
        let url = self.service_url(def.service, &def.list_path, Some(target));
        let query = self.list_query(def, target, page_token);
        let response = self.get(&url, &query).await?;

        Ok(Page::from_response(response, &def.response_path))
    }
}
