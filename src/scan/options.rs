//! Scan options

use crate::error::ConfigError;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Configuration for one scan. Validated once before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Maximum number of targets scanned at the same time
    pub concurrency_limit: usize,
    /// Targets (or regions) to scan; empty means all
    pub target_filter: BTreeSet<String>,
    /// Retries per page fetch after the first attempt, transient errors only
    pub max_retries: i32,
    /// Time budget for the whole run
    pub deadline: Option<Duration>,
    /// Delay before the first retry, doubled for each further one
    pub retry_backoff: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            target_filter: BTreeSet::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            deadline: Some(DEFAULT_DEADLINE),
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl ScanOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ConcurrencyLimit);
        }
        if self.concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooHigh {
                limit: self.concurrency_limit,
                max: Semaphore::MAX_PERMITS,
            });
        }
        if self.max_retries < 0 {
            return Err(ConfigError::NegativeRetries(self.max_retries));
        }
        match self.deadline {
            Some(deadline) if !deadline.is_zero() => Ok(()),
            _ => Err(ConfigError::MissingDeadline),
        }
    }

    pub fn with_target_filter<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_filter = targets.into_iter().map(Into::into).collect();
        self
    }
}
