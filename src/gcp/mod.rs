//! GCP API interaction module
//!
//! This module provides the core functionality for interacting with Google Cloud Platform
//! APIs: authentication, the HTTP client, and target enumeration.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client, the inventory's [`ResourceSource`](crate::resource::ResourceSource)
//! - [`http`] - HTTP utilities for REST API calls
//! - [`regions`] - Region and zone listing
//!
//! # Example
//!
//! ```ignore
//! use cloudventory::gcp::{auth::GcpCredentials, client::GcpClient, regions};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new("my-project", GcpCredentials::new().await?)?;
//!     let regions = regions::list_regions(&client, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod regions;
