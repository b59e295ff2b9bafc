//! HTTP utilities for GCP REST API calls

use crate::error::FetchError;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for one request, body included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Maximum length of a provider error message carried into errors
const MAX_ERROR_MESSAGE_LENGTH: usize = 120;

/// Error from a GCP REST call
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("API request failed: {status}{}", format_message(.message))]
    Status { status: StatusCode, message: String },

    #[error("failed to send request: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request cancelled")]
    Cancelled,
}

fn format_message(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(" - {}", message)
    }
}

impl ApiError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            ApiError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            ApiError::Decode(_) | ApiError::Auth(_) | ApiError::Cancelled => false,
        }
    }
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        if matches!(err, ApiError::Cancelled) {
            FetchError::Cancelled
        } else if err.is_transient() {
            FetchError::Transient(err.to_string())
        } else {
            FetchError::Permanent(err.to_string())
        }
    }
}

/// Sanitize response body for logging
/// Truncates long responses and masks potentially sensitive patterns
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = floor_char_boundary(body, MAX_LOG_BODY_LENGTH);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut cut = max.min(s.len());
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

/// Pull `error.message` out of a GCP error body, truncated
fn extract_error_message(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_default();

    message
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(MAX_ERROR_MESSAGE_LENGTH)
        .collect()
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client with the default timeouts
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeouts(DEFAULT_REQUEST_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// A request that exceeds `request` fails as a transient transport error
    pub fn with_timeouts(request: Duration, connect: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(format!("cloudventory/{}", crate::VERSION))
            .timeout(request)
            .connect_timeout(connect)
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, query: &[(String, String)], token: &str) -> Result<Value, ApiError> {
        tracing::debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::Transport)?;

        let status = response.status();
        let body = response.text().await.map_err(ApiError::Transport)?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::Status {
                status,
                message: extract_error_message(&body),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(code: u16) -> ApiError {
        ApiError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            message: String::new(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(status_error(code).is_transient(), "{code} should be transient");
        }
        for code in [400, 401, 403, 404, 409] {
            assert!(!status_error(code).is_transient(), "{code} should be permanent");
        }
    }

    #[test]
    fn test_conversion_to_fetch_error() {
        assert!(FetchError::from(status_error(503)).is_transient());
        assert!(!FetchError::from(status_error(403)).is_transient());
        assert!(!FetchError::from(ApiError::Auth("no credentials".into())).is_transient());
        assert_eq!(FetchError::from(ApiError::Cancelled), FetchError::Cancelled);
    }

    #[test]
    fn test_status_error_display_includes_message() {
        let err = ApiError::Status {
            status: StatusCode::FORBIDDEN,
            message: "Compute Engine API has not been used".into(),
        };
        assert_eq!(
            err.to_string(),
            "API request failed: 403 Forbidden - Compute Engine API has not been used"
        );
        assert_eq!(status_error(404).to_string(), "API request failed: 404 Not Found");
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"error":{"code":403,"message":"Permission denied\non project"}}"#;
        assert_eq!(extract_error_message(body), "Permission deniedon project");
        assert_eq!(extract_error_message("<html>oops</html>"), "");
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
        assert!(sanitized.len() < 300);
    }
}
