//! Paginated Source Reader
//!
//! Drains a cursor-based listing for one target as a lazy stream. The next page is
//! only requested when the consumer polls for it, so peak memory is one page per
//! in-flight target no matter how large the listing is.

use crate::error::{FetchError, TargetScanError};
use crate::resource::Page;
use crate::scan::ScanOptions;
use futures::stream::{self, Stream, TryStreamExt};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound for a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry behaviour for page fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling and capped
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl From<&ScanOptions> for RetryPolicy {
    fn from(options: &ScanOptions) -> Self {
        Self {
            max_retries: u32::try_from(options.max_retries).unwrap_or(0),
            base_backoff: options.retry_backoff,
        }
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Stream the pages of one target.
///
/// `fetch` receives the page token (`None` for the first page). The stream ends after
/// the page without a next token, or after yielding the first error; it cannot be
/// restarted. Cancellation is observed before every fetch and during backoff, never
/// in the middle of a page.
pub fn pages<F, Fut>(
    fetch: F,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Vec<Value>, TargetScanError>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page, FetchError>>,
{
    stream::try_unfold(
        (fetch, Cursor::Start, cancel),
        move |(mut fetch, cursor, cancel)| async move {
            let token = match cursor {
                Cursor::Done => return Ok(None),
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
            };

            let page = fetch_with_retry(&mut fetch, token, &policy, &cancel).await?;
            let next = match page.next_page_token {
                Some(token) => Cursor::Next(token),
                None => Cursor::Done,
            };

            Ok(Some((page.records, (fetch, next, cancel))))
        },
    )
}

/// Stream the individual records of one target
pub fn records<F, Fut>(
    fetch: F,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Value, TargetScanError>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page, FetchError>>,
{
    pages(fetch, policy, cancel)
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<Value, TargetScanError>)))
        .try_flatten()
}

async fn fetch_with_retry<F, Fut>(
    fetch: &mut F,
    token: Option<String>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Page, TargetScanError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page, FetchError>>,
{
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(TargetScanError::Cancelled);
        }

        attempts += 1;
        match fetch(token.clone()).await {
            Ok(page) => return Ok(page),
            Err(err) if err.is_transient() && attempts <= policy.max_retries => {
                let delay = policy.backoff_for(attempts);
                tracing::warn!(attempt = attempts, ?delay, "page fetch failed, retrying: {}", err);

                tokio::select! {
                    _ = cancel.cancelled() => return Err(TargetScanError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(source) => return Err(TargetScanError::Fetch { attempts, source }),
        }
    }
}
