//! Inventory Orchestrator
//!
//! Runs the discovery, scan and persist pipeline of every selected resource type, either
//! one after another (fail-fast) or all at once (run to completion), and collects a
//! [`RunReport`].

use crate::error::{panic_message, ConfigError, DiscoveryError, PipelineError, TargetScanError};
use crate::resource::{normalize, InventoryRow, ResourceDef, ResourceSource};
use crate::scan::{pages, scan, RetryPolicy, RowSink, ScanOptions, ScanResult, ScanTarget};
use crate::store::InventorySink;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// How resource types are scheduled relative to each other
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// All types at once; every type runs to completion
    #[default]
    Parallel,
    /// One type at a time in registry order; stops at the first failure
    Sequential,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Parallel => write!(f, "parallel"),
            ExecutionMode::Sequential => write!(f, "sequential"),
        }
    }
}

/// What one successful pipeline produced
#[derive(Debug, Clone)]
pub struct TypeSummary {
    pub targets: usize,
    pub rows: usize,
    /// Ledger entries, one per failed target
    pub warnings: Vec<String>,
    pub duration: Duration,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded(TypeSummary),
    Failed(PipelineError),
    /// Not started because an earlier type failed in sequential mode
    Skipped,
}

#[derive(Debug)]
pub struct ResourceReport {
    pub resource: String,
    pub outcome: PipelineOutcome,
}

/// Outcome of one inventory run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: ExecutionMode,
    /// In registry order
    pub resources: Vec<ResourceReport>,
    pub duration: Duration,
    first_failed: Option<String>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.first_failed.is_none()
    }

    /// The run's error: the first failure in completion order
    pub fn first_error(&self) -> Option<&PipelineError> {
        let key = self.first_failed.as_deref()?;
        self.resources.iter().find_map(|r| match &r.outcome {
            PipelineOutcome::Failed(err) if r.resource == key => Some(err),
            _ => None,
        })
    }

    pub fn outcome(&self, resource: &str) -> Option<&PipelineOutcome> {
        self.resources
            .iter()
            .find(|r| r.resource == resource)
            .map(|r| &r.outcome)
    }

    pub fn total_rows(&self) -> usize {
        self.resources
            .iter()
            .map(|r| match &r.outcome {
                PipelineOutcome::Succeeded(summary) => summary.rows,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Inventory run {} ({}) finished in {:.1}s",
            self.run_id,
            self.mode,
            self.duration.as_secs_f64()
        )?;

        for report in &self.resources {
            match &report.outcome {
                PipelineOutcome::Succeeded(summary) => {
                    writeln!(
                        f,
                        "  ok       {}: {} rows from {} targets",
                        report.resource, summary.rows, summary.targets
                    )?;
                    for warning in &summary.warnings {
                        writeln!(f, "  warning  {}: {}", report.resource, warning)?;
                    }
                }
                PipelineOutcome::Failed(err) => writeln!(f, "  failed   {}", err)?,
                PipelineOutcome::Skipped => writeln!(f, "  skipped  {}", report.resource)?,
            }
        }

        match self.first_error() {
            Some(err) => write!(f, "Run failed: {}", err),
            None => write!(f, "{} rows inventoried", self.total_rows()),
        }
    }
}

/// Drives the per-type pipelines of a run
#[derive(Clone)]
pub struct Inventory {
    source: Arc<dyn ResourceSource>,
    sinks: Vec<Arc<dyn InventorySink>>,
    resources: Vec<Arc<ResourceDef>>,
    options: ScanOptions,
    run_id: Uuid,
}

impl Inventory {
    /// Options are validated here, before any resource type starts
    pub fn new(
        source: Arc<dyn ResourceSource>,
        resources: Vec<Arc<ResourceDef>>,
        options: ScanOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        Ok(Self {
            source,
            sinks: Vec::new(),
            resources,
            options,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn InventorySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Run every selected resource type.
    ///
    /// The run deadline and `cancel` both stop admission of new targets and pages.
    pub async fn run(&self, mode: ExecutionMode, cancel: &CancellationToken) -> RunReport {
        let started = Instant::now();
        let run_cancel = cancel.child_token();

        let deadline = self.options.deadline.unwrap_or(crate::scan::options::DEFAULT_DEADLINE);
        let timer = {
            let token = run_cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!("Run deadline of {:?} reached, cancelling", deadline);
                token.cancel();
            })
        };

        info!(
            run_id = %self.run_id,
            mode = %mode,
            "Starting inventory of {} resource types",
            self.resources.len()
        );

        let (outcomes, first_failed) = match mode {
            ExecutionMode::Sequential => self.run_sequential(&run_cancel).await,
            ExecutionMode::Parallel => self.run_parallel(&run_cancel).await,
        };
        timer.abort();

        let resources = self
            .resources
            .iter()
            .zip(outcomes)
            .map(|(def, outcome)| ResourceReport {
                resource: def.key.clone(),
                outcome,
            })
            .collect();

        let report = RunReport {
            run_id: self.run_id,
            mode,
            resources,
            duration: started.elapsed(),
            first_failed,
        };

        info!(
            run_id = %self.run_id,
            success = report.is_success(),
            "Inventory finished in {:?}",
            report.duration
        );
        report
    }

    async fn run_sequential(
        &self,
        cancel: &CancellationToken,
    ) -> (Vec<PipelineOutcome>, Option<String>) {
        let mut outcomes = Vec::with_capacity(self.resources.len());
        let mut first_failed = None;

        for def in &self.resources {
            if first_failed.is_some() {
                outcomes.push(PipelineOutcome::Skipped);
                continue;
            }

            let outcome = join_pipeline(def, self.spawn_pipeline(def, cancel).await);
            if matches!(outcome, PipelineOutcome::Failed(_)) {
                first_failed = Some(def.key.clone());
            }
            outcomes.push(outcome);
        }

        (outcomes, first_failed)
    }

    async fn run_parallel(
        &self,
        cancel: &CancellationToken,
    ) -> (Vec<PipelineOutcome>, Option<String>) {
        let mut running: FuturesUnordered<_> = self
            .resources
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let handle = self.spawn_pipeline(def, cancel);
                async move { (index, handle.await) }
            })
            .collect();

        let mut outcomes: Vec<Option<PipelineOutcome>> =
            self.resources.iter().map(|_| None).collect();
        let mut first_failed = None;

        while let Some((index, joined)) = running.next().await {
            let def = &self.resources[index];
            let outcome = join_pipeline(def, joined);
            if first_failed.is_none() && matches!(outcome, PipelineOutcome::Failed(_)) {
                first_failed = Some(def.key.clone());
            }
            outcomes[index] = Some(outcome);
        }

        let outcomes = outcomes
            .into_iter()
            .map(|o| o.unwrap_or(PipelineOutcome::Skipped))
            .collect();
        (outcomes, first_failed)
    }

    fn spawn_pipeline(
        &self,
        def: &Arc<ResourceDef>,
        cancel: &CancellationToken,
    ) -> JoinHandle<Result<TypeSummary, PipelineError>> {
        let span = info_span!("resource", resource = %def.key, run_id = %self.run_id);
        let pipeline = run_pipeline(
            self.source.clone(),
            self.sinks.clone(),
            def.clone(),
            def.scan_options(&self.options),
            cancel.clone(),
        );
        tokio::spawn(pipeline.instrument(span))
    }
}

fn join_pipeline(
    def: &ResourceDef,
    joined: Result<Result<TypeSummary, PipelineError>, JoinError>,
) -> PipelineOutcome {
    let result = match joined {
        Ok(result) => result,
        Err(err) => {
            let message = if err.is_panic() {
                panic_message(err.into_panic().as_ref())
            } else {
                "pipeline task was aborted".to_string()
            };
            Err(PipelineError::Panicked {
                resource: def.key.clone(),
                message,
            })
        }
    };

    match result {
        Ok(summary) => PipelineOutcome::Succeeded(summary),
        Err(err) => {
            tracing::error!("{}", err);
            PipelineOutcome::Failed(err)
        }
    }
}

/// Discovery, scan and persistence of one resource type
async fn run_pipeline(
    source: Arc<dyn ResourceSource>,
    sinks: Vec<Arc<dyn InventorySink>>,
    def: Arc<ResourceDef>,
    options: ScanOptions,
    cancel: CancellationToken,
) -> Result<TypeSummary, PipelineError> {
    let started = Instant::now();
    info!("Starting {} inventory", def.display_name);

    let targets = source
        .list_targets(&def, &cancel)
        .await
        .map_err(|e| PipelineError::Discovery {
            resource: def.key.clone(),
            source: DiscoveryError::from(e),
        })?;
    info!(targets = targets.len(), "Discovered targets");

    let result = scan(
        targets,
        &options,
        &cancel,
        target_scanner(source, def.clone(), RetryPolicy::from(&options), cancel.clone()),
    )
    .await
    .map_err(|source| PipelineError::Scan {
        resource: def.key.clone(),
        source,
    })?;

    for warning in result.warnings() {
        warn!("Partial result: {}", warning);
    }

    for sink in &sinks {
        let written = sink
            .persist(&def, &result, &cancel)
            .await
            .map_err(|source| PipelineError::Persistence {
                resource: def.key.clone(),
                source,
            })?;
        info!(sink = sink.name(), "Persisted {} rows", written);
    }

    let summary = summarize(&result, started.elapsed());
    info!(
        rows = summary.rows,
        warnings = summary.warnings.len(),
        "Fetch duration: {:?}",
        summary.duration
    );
    Ok(summary)
}

fn summarize(result: &ScanResult<InventoryRow>, duration: Duration) -> TypeSummary {
    TypeSummary {
        targets: result.targets_scanned,
        rows: result.rows.len(),
        warnings: result.warnings(),
        duration,
    }
}

/// Per-target scan function: drain the target's pages and normalize each record
fn target_scanner(
    source: Arc<dyn ResourceSource>,
    def: Arc<ResourceDef>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> impl Fn(ScanTarget, RowSink<InventoryRow>) -> BoxFuture<'static, Result<(), TargetScanError>>
       + Send
       + Sync
       + 'static {
    move |target: ScanTarget, sink: RowSink<InventoryRow>| {
        let fetch = {
            let (source, def, target) = (source.clone(), def.clone(), target.clone());
            move |token: Option<String>| {
                let (source, def, target) = (source.clone(), def.clone(), target.clone());
                async move { source.fetch_page(&def, &target, token.as_deref()).await }
            }
        };
        let def = def.clone();
        let project = source.project_id().to_string();
        let cancel = cancel.clone();

        async move {
            let mut stream = std::pin::pin!(pages(fetch, policy, cancel));
            while let Some(page) = stream.next().await {
                let records = page?;
                sink.extend(
                    records
                        .iter()
                        .filter_map(|r| normalize(&def, &project, &target, r)),
                );
            }
            Ok(())
        }
        .boxed()
    }
}
