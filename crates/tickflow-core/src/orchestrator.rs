//! Bootstrap and incremental runs over the work-item list.
//!
//! Every run fans out one task per work item and waits for all of them.
//! Recoverable fetch failures skip their item; an escalating failure (or any
//! storage error other than a missing aggregate) aborts the remaining tasks
//! and fails the run.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{ErrorKind, FetchError, RateGateway};
use crate::merge;
use crate::shutdown::Shutdown;
use crate::store::{AggregateStore, StoreError};
use crate::{Interval, StockAggregate, Symbol, WorkItem};

/// The two job shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Bootstrap,
    Incremental,
}

impl JobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Incremental => "incremental",
        }
    }
}

impl Display for JobKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{symbol} ({interval}): {source}")]
    Fetch {
        symbol: Symbol,
        interval: Interval,
        #[source]
        source: FetchError,
    },

    #[error("storage failure: {source}")]
    Store {
        #[source]
        source: StoreError,
    },

    #[error("run cancelled by shutdown")]
    Cancelled,

    #[error("item task failed: {0}")]
    Task(String),
}

impl From<StoreError> for JobError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

/// An item excluded from a run by a recoverable fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub symbol: Symbol,
    pub interval: Interval,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub job: JobKind,
    pub run_id: Uuid,
    /// Work items considered.
    pub items: usize,
    /// Partitions created (bootstrap) or appended to (incremental).
    pub written: usize,
    /// Partitions with nothing new.
    pub unchanged: usize,
    /// Already-bootstrapped partitions, or appends with no partition to land in.
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    pub points_written: usize,
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
}

fn serialize_seconds<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(value.as_secs_f64())
}

impl RunReport {
    fn new(job: JobKind, run_id: Uuid, items: usize) -> Self {
        Self {
            job,
            run_id,
            items,
            written: 0,
            unchanged: 0,
            skipped: 0,
            failures: Vec::new(),
            points_written: 0,
            elapsed: Duration::ZERO,
        }
    }
}

enum ItemOutcome {
    Fetched(StockAggregate),
    AlreadyPresent,
    Appended(usize),
    Unchanged,
    AggregateMissing,
    Failed(ItemFailure),
}

/// Drives runs; shared by the scheduler and the one-shot CLI commands.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<RateGateway>,
    store: Arc<dyn AggregateStore>,
    work_items: Arc<[WorkItem]>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<RateGateway>,
        store: Arc<dyn AggregateStore>,
        work_items: Vec<WorkItem>,
    ) -> Self {
        Self {
            gateway,
            store,
            work_items: work_items.into(),
        }
    }

    pub fn work_items(&self) -> &[WorkItem] {
        &self.work_items
    }

    /// Create every partition that does not exist yet.
    pub async fn bootstrap(&self, shutdown: &Shutdown) -> Result<RunReport, JobError> {
        let started = Instant::now();
        let mut report = RunReport::new(JobKind::Bootstrap, Uuid::new_v4(), self.work_items.len());
        info!(job = %report.job, run_id = %report.run_id, items = report.items, "run started");

        let outcomes = self
            .fan_out(&report, shutdown, |item, gateway, store| {
                bootstrap_item(item, gateway, store)
            })
            .await?;

        let mut collected = Vec::new();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Fetched(aggregate) => collected.push(aggregate),
                ItemOutcome::AlreadyPresent => report.skipped += 1,
                ItemOutcome::Failed(failure) => report.failures.push(failure),
                ItemOutcome::Appended(_)
                | ItemOutcome::Unchanged
                | ItemOutcome::AggregateMissing => {}
            }
        }

        if !collected.is_empty() {
            let points: usize = collected.iter().map(|a| a.points().len()).sum();
            let created = collected.len();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(JobError::Cancelled),
                result = self.store.create_aggregates(collected) => result?,
            }
            report.written = created;
            report.points_written = points;
        }

        report.elapsed = started.elapsed();
        log_completed(&report);
        Ok(report)
    }

    /// Append newly observed points to every existing partition.
    pub async fn incremental(&self, shutdown: &Shutdown) -> Result<RunReport, JobError> {
        let started = Instant::now();
        let mut report =
            RunReport::new(JobKind::Incremental, Uuid::new_v4(), self.work_items.len());
        info!(job = %report.job, run_id = %report.run_id, items = report.items, "run started");

        let outcomes = self
            .fan_out(&report, shutdown, |item, gateway, store| {
                incremental_item(item, gateway, store)
            })
            .await?;

        for outcome in outcomes {
            match outcome {
                ItemOutcome::Appended(points) => {
                    report.written += 1;
                    report.points_written += points;
                }
                ItemOutcome::Unchanged => report.unchanged += 1,
                ItemOutcome::AggregateMissing => report.skipped += 1,
                ItemOutcome::Failed(failure) => report.failures.push(failure),
                ItemOutcome::Fetched(_) | ItemOutcome::AlreadyPresent => {}
            }
        }

        report.elapsed = started.elapsed();
        log_completed(&report);
        Ok(report)
    }

    async fn fan_out<F, Fut>(
        &self,
        report: &RunReport,
        shutdown: &Shutdown,
        mut per_item: F,
    ) -> Result<Vec<ItemOutcome>, JobError>
    where
        F: FnMut(WorkItem, Arc<RateGateway>, Arc<dyn AggregateStore>) -> Fut,
        Fut: Future<Output = Result<ItemOutcome, JobError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for item in self.work_items.iter().cloned() {
            tasks.spawn(per_item(
                item,
                Arc::clone(&self.gateway),
                Arc::clone(&self.store),
            ));
        }

        let mut outcomes = Vec::with_capacity(self.work_items.len());
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tasks.abort_all();
                    warn!(
                        job = %report.job,
                        run_id = %report.run_id,
                        "run cancelled; in-flight items aborted"
                    );
                    return Err(JobError::Cancelled);
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok(Ok(outcome))) => {
                        if let ItemOutcome::Failed(failure) = &outcome {
                            warn!(
                                job = %report.job,
                                run_id = %report.run_id,
                                symbol = %failure.symbol,
                                interval = %failure.interval,
                                kind = %failure.kind,
                                error = %failure.message,
                                "item skipped"
                            );
                        }
                        outcomes.push(outcome);
                    }
                    Some(Ok(Err(error))) => {
                        tasks.abort_all();
                        warn!(job = %report.job, run_id = %report.run_id, %error, "run aborted");
                        return Err(error);
                    }
                    Some(Err(join_error)) => {
                        tasks.abort_all();
                        return Err(JobError::Task(join_error.to_string()));
                    }
                },
            }
        }

        Ok(outcomes)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("work_items", &self.work_items.len())
            .finish_non_exhaustive()
    }
}

fn classify_fetch(item: &WorkItem, error: FetchError) -> Result<ItemOutcome, JobError> {
    if error.kind().escalates() {
        return Err(JobError::Fetch {
            symbol: item.symbol.clone(),
            interval: item.interval,
            source: error,
        });
    }

    Ok(ItemOutcome::Failed(ItemFailure {
        symbol: item.symbol.clone(),
        interval: item.interval,
        kind: error.kind(),
        message: error.message().to_owned(),
    }))
}

async fn bootstrap_item(
    item: WorkItem,
    gateway: Arc<RateGateway>,
    store: Arc<dyn AggregateStore>,
) -> Result<ItemOutcome, JobError> {
    if store
        .find_aggregate(&item.symbol, item.interval)
        .await?
        .is_some()
    {
        info!(
            symbol = %item.symbol,
            interval = %item.interval,
            "aggregate already stored; skipping"
        );
        return Ok(ItemOutcome::AlreadyPresent);
    }

    match gateway.fetch_aggregate(&item).await {
        Ok(aggregate) => {
            debug!(
                symbol = %item.symbol,
                interval = %item.interval,
                points = aggregate.points().len(),
                "aggregate fetched"
            );
            Ok(ItemOutcome::Fetched(aggregate))
        }
        Err(error) => classify_fetch(&item, error),
    }
}

async fn incremental_item(
    item: WorkItem,
    gateway: Arc<RateGateway>,
    store: Arc<dyn AggregateStore>,
) -> Result<ItemOutcome, JobError> {
    let fetched = match gateway.fetch_points(&item).await {
        Ok(points) => points,
        Err(error) => return classify_fetch(&item, error),
    };

    let persisted = store.existing_timestamps(&item.symbol, item.interval).await?;
    let fresh = merge::new_points(&persisted, fetched);
    if fresh.is_empty() {
        debug!(symbol = %item.symbol, interval = %item.interval, "no new points");
        return Ok(ItemOutcome::Unchanged);
    }

    let count = fresh.len();
    match store.append_points(&item.symbol, item.interval, fresh).await {
        Ok(()) => {
            debug!(
                symbol = %item.symbol,
                interval = %item.interval,
                points = count,
                "points appended"
            );
            Ok(ItemOutcome::Appended(count))
        }
        Err(error) if error.escalates() => Err(error.into()),
        Err(_) => {
            warn!(
                symbol = %item.symbol,
                interval = %item.interval,
                "no aggregate to append to; bootstrap has not stored this item"
            );
            Ok(ItemOutcome::AggregateMissing)
        }
    }
}

fn log_completed(report: &RunReport) {
    info!(
        job = %report.job,
        run_id = %report.run_id,
        items = report.items,
        written = report.written,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failures.len(),
        points_written = report.points_written,
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        "run completed"
    );
}
