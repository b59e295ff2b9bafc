//! Bounded Fan-Out Scanner
//!
//! Runs one task per target behind a counting admission gate. A target that returns an
//! error or panics is written to the ledger; its siblings keep going, and the call only
//! returns once every dispatched task has finished.

use super::{ScanOptions, ScanResult, ScanTarget, TargetFailure};
use crate::error::{panic_message, ScanError, TargetScanError};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Rows and ledger shared by the tasks of one scan
struct Accumulator<R> {
    rows: Mutex<Vec<R>>,
    failures: Mutex<Vec<TargetFailure>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Only appends happen under these locks
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R> Accumulator<R> {
    fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn record_failure(&self, target: ScanTarget, error: TargetScanError) {
        lock(&self.failures).push(TargetFailure { target, error });
    }

    fn into_result(self, targets_scanned: usize) -> ScanResult<R> {
        ScanResult {
            rows: self.rows.into_inner().unwrap_or_else(PoisonError::into_inner),
            failures: self.failures.into_inner().unwrap_or_else(PoisonError::into_inner),
            targets_scanned,
        }
    }

    fn take_result(&self, targets_scanned: usize) -> ScanResult<R> {
        ScanResult {
            rows: std::mem::take(&mut *lock(&self.rows)),
            failures: std::mem::take(&mut *lock(&self.failures)),
            targets_scanned,
        }
    }
}

/// Append handle given to each target task
pub struct RowSink<R> {
    acc: Arc<Accumulator<R>>,
}

impl<R> RowSink<R> {
    /// Append the rows of one page. Hold no lock while waiting on I/O; call this per page.
    pub fn extend<I: IntoIterator<Item = R>>(&self, rows: I) {
        let rows: Vec<R> = rows.into_iter().collect();
        if rows.is_empty() {
            return;
        }
        lock(&self.acc.rows).extend(rows);
    }

    pub fn push(&self, row: R) {
        lock(&self.acc.rows).push(row);
    }
}

/// Scan every target that passes the filter with at most `concurrency_limit` tasks at once.
///
/// Options are validated before anything is dispatched. Once `cancel` fires no further
/// target is admitted; running tasks are left to stop at their next page boundary and
/// the call then fails with [`ScanError::Cancelled`].
pub async fn scan<R, F, Fut>(
    targets: Vec<ScanTarget>,
    options: &ScanOptions,
    cancel: &CancellationToken,
    scan_fn: F,
) -> Result<ScanResult<R>, ScanError>
where
    R: Send + 'static,
    F: Fn(ScanTarget, RowSink<R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TargetScanError>> + Send + 'static,
{
    options.validate()?;

    let targets: Vec<ScanTarget> = targets
        .into_iter()
        .filter(|t| t.matches(&options.target_filter))
        .collect();
    let targets_scanned = targets.len();

    if targets.is_empty() {
        return Ok(ScanResult::default());
    }

    let gate = Arc::new(Semaphore::new(options.concurrency_limit));
    let acc = Arc::new(Accumulator::new());
    let scan_fn = Arc::new(scan_fn);
    let mut running = FuturesUnordered::new();

    for target in targets {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = gate.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let sink = RowSink { acc: acc.clone() };
        let task_fn = scan_fn.clone();
        let task_target = target.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            (*task_fn)(task_target, sink).await
        });

        running.push(handle.map(move |joined| (target, joined)));
    }

    while let Some((target, joined)) = running.next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(error)) => error,
            Err(join_err) if join_err.is_panic() => {
                TargetScanError::Panicked(panic_message(join_err.into_panic().as_ref()))
            }
            Err(_) => TargetScanError::Aborted,
        };

        tracing::warn!(target = %target, "target scan failed: {}", error);
        acc.record_failure(target, error);
    }

    if cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }

    // Every task has finished, so the sinks they held are gone
    Ok(match Arc::try_unwrap(acc) {
        Ok(acc) => acc.into_result(targets_scanned),
        Err(shared) => shared.take_result(targets_scanned),
    })
}
