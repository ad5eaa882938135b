//! One-shot and fixed-interval job scheduling on tokio timers.
//!
//! Each job is a small state machine:
//!
//! ```text
//! Idle ──▶ Running ──▶ Succeeded ──▶ Idle (next trigger)
//!                 └──▶ Faulted ───▶ Suspended (no further triggers)
//! ```
//!
//! A cancelled run returns the job to `Idle` and stops it without suspension.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::orchestrator::{JobError, JobKind, Orchestrator, RunReport};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    Faulted,
    Suspended,
}

impl JobState {
    /// No further runs will happen in this state once the job task ends.
    pub const fn is_suspended(self) -> bool {
        matches!(self, Self::Suspended)
    }
}

pub type JobFuture<'a> = Pin<Box<dyn Future<Output = Result<RunReport, JobError>> + Send + 'a>>;

/// Unit of scheduled work.
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, shutdown: &'a Shutdown) -> JobFuture<'a>;
}

/// Bootstrap or incremental run of an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct IngestJob {
    kind: JobKind,
    orchestrator: Orchestrator,
}

impl IngestJob {
    pub fn bootstrap(orchestrator: Orchestrator) -> Self {
        Self {
            kind: JobKind::Bootstrap,
            orchestrator,
        }
    }

    pub fn incremental(orchestrator: Orchestrator) -> Self {
        Self {
            kind: JobKind::Incremental,
            orchestrator,
        }
    }
}

impl Job for IngestJob {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn run<'a>(&'a self, shutdown: &'a Shutdown) -> JobFuture<'a> {
        match self.kind {
            JobKind::Bootstrap => Box::pin(self.orchestrator.bootstrap(shutdown)),
            JobKind::Incremental => Box::pin(self.orchestrator.incremental(shutdown)),
        }
    }
}

/// Handle to a scheduled job.
pub struct JobHandle {
    name: String,
    state: watch::Receiver<JobState>,
    last_report: Arc<Mutex<Option<RunReport>>>,
    task: JoinHandle<JobState>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Wait for the job task to finish and return its final state.
    pub async fn join(self) -> JobState {
        self.task.await.unwrap_or(JobState::Suspended)
    }

    /// Like [`JobHandle::join`], also returning the report of the last successful run.
    pub async fn join_with_report(self) -> (JobState, Option<RunReport>) {
        let last_report = Arc::clone(&self.last_report);
        let state = self.join().await;
        let report = last_report
            .lock()
            .expect("last report mutex poisoned")
            .take();
        (state, report)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Spawns jobs that all observe the same shutdown signal.
#[derive(Debug, Clone)]
pub struct Scheduler {
    shutdown: Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

struct RunContext {
    job: Arc<dyn Job>,
    shutdown: Shutdown,
    state: watch::Sender<JobState>,
    last_report: Arc<Mutex<Option<RunReport>>>,
}

impl RunContext {
    async fn execute(&self) -> Flow {
        let name = self.job.name();
        self.state.send_replace(JobState::Running);

        match self.job.run(&self.shutdown).await {
            Ok(report) => {
                *self.last_report.lock().expect("last report mutex poisoned") = Some(report);
                self.state.send_replace(JobState::Succeeded);
                Flow::Continue
            }
            Err(JobError::Cancelled) => {
                info!(job = name, "job cancelled; stopping");
                self.state.send_replace(JobState::Idle);
                Flow::Stop
            }
            Err(error) => {
                self.state.send_replace(JobState::Faulted);
                error!(job = name, %error, "job faulted; suspending further runs");
                self.state.send_replace(JobState::Suspended);
                Flow::Stop
            }
        }
    }

    fn final_state(&self) -> JobState {
        *self.state.borrow()
    }
}

impl Scheduler {
    pub fn new(shutdown: Shutdown) -> Self {
        Self { shutdown }
    }

    /// Run the job once, immediately.
    pub fn run_once(&self, job: Arc<dyn Job>) -> JobHandle {
        self.spawn(job, |context| async move {
            if context.shutdown.is_triggered() {
                return JobState::Idle;
            }
            context.execute().await;
            context.final_state()
        })
    }

    /// Run the job every `period`, first after `initial_delay`. Runs never
    /// overlap; ticks missed during a long run collapse into a single run.
    pub fn run_every(
        &self,
        job: Arc<dyn Job>,
        period: Duration,
        initial_delay: Duration,
    ) -> JobHandle {
        self.spawn(job, move |context| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = context.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match context.execute().await {
                    Flow::Continue => {
                        context.state.send_replace(JobState::Idle);
                    }
                    Flow::Stop => break,
                }
            }

            context.final_state()
        })
    }

    fn spawn<F, Fut>(&self, job: Arc<dyn Job>, body: F) -> JobHandle
    where
        F: FnOnce(RunContext) -> Fut,
        Fut: Future<Output = JobState> + Send + 'static,
    {
        let (state, receiver) = watch::channel(JobState::Idle);
        let last_report = Arc::new(Mutex::new(None));
        let name = job.name().to_owned();

        let context = RunContext {
            job,
            shutdown: self.shutdown.clone(),
            state,
            last_report: Arc::clone(&last_report),
        };

        JobHandle {
            name,
            state: receiver,
            last_report,
            task: tokio::spawn(body(context)),
        }
    }
}
