//! Recurring job queue contract and implementations.

use crate::error::{BackupError, BackupResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Conditions a job needs before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JobConstraints {
    /// Only run on an unmetered network.
    pub unmetered_network: bool,
}

/// Request to install a recurring job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJob {
    /// Logical job name. At most one job per name exists.
    pub name: String,
    /// Time between runs.
    pub interval: Duration,
    /// Replace a job of the same name; otherwise an existing job is kept.
    pub replace_existing: bool,
    /// Run conditions.
    pub constraints: JobConstraints,
}

impl PeriodicJob {
    /// Creates a replacing job request without constraints.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            replace_existing: true,
            constraints: JobConstraints::default(),
        }
    }

    /// Sets the run conditions.
    pub fn with_constraints(mut self, constraints: JobConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Keeps an existing job of the same name instead of replacing it.
    pub fn keep_existing(mut self) -> Self {
        self.replace_existing = false;
        self
    }
}

/// Lifecycle of an installed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for the next run.
    Enqueued,
    /// A run is in progress.
    Running,
}

/// Result of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The run did its work.
    Success,
    /// The run gave up.
    Failure(String),
}

/// An installed job as reported by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueuedJob {
    /// Time between runs.
    pub interval: Duration,
    /// Current state.
    pub state: JobState,
    /// Run conditions.
    pub constraints: JobConstraints,
    /// Outcome of the most recent run.
    pub last_outcome: Option<JobOutcome>,
}

impl EnqueuedJob {
    fn installed(job: &PeriodicJob) -> Self {
        Self {
            interval: job.interval,
            state: JobState::Enqueued,
            constraints: job.constraints,
            last_outcome: None,
        }
    }
}

/// A queue of named recurring jobs.
///
/// The queue is authoritative for which jobs exist; schedulers only refer
/// to jobs by name.
///
/// # Implementors
///
/// - [`InMemoryJobQueue`] - Records requests, for testing
/// - [`TokioJobQueue`] - Runs registered workers on tokio timers
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Installs a recurring job.
    async fn enqueue_periodic(&self, job: PeriodicJob) -> BackupResult<()>;

    /// Removes the job called `name`. Absent jobs are not an error.
    async fn cancel(&self, name: &str) -> BackupResult<()>;

    /// Returns the installed jobs called `name`.
    async fn list_enqueued(&self, name: &str) -> BackupResult<Vec<EnqueuedJob>>;
}

/// Work performed by one job run.
#[async_trait]
pub trait JobWorker: Send + Sync {
    /// Performs one run.
    async fn run(&self) -> JobOutcome;
}

/// A change made to an [`InMemoryJobQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A job was installed or replaced.
    Installed(PeriodicJob),
    /// A job was removed.
    Cancelled(String),
}

/// Job queue that records jobs without running them.
///
/// An optional install delay simulates a slow platform queue. The install
/// only takes effect once the delay has elapsed, so a caller that abandons
/// the request midway leaves no trace.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: RwLock<HashMap<String, EnqueuedJob>>,
    history: Mutex<Vec<QueueEvent>>,
    install_delay: Option<Duration>,
}

impl InMemoryJobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every install by `delay`.
    pub fn with_install_delay(mut self, delay: Duration) -> Self {
        self.install_delay = Some(delay);
        self
    }

    /// Returns the job called `name`.
    pub fn job(&self, name: &str) -> Option<EnqueuedJob> {
        self.jobs.read().get(name).cloned()
    }

    /// Returns every change in order.
    pub fn history(&self) -> Vec<QueueEvent> {
        self.history.lock().clone()
    }

    /// Returns the install requests in order.
    pub fn installs(&self) -> Vec<PeriodicJob> {
        self.history
            .lock()
            .iter()
            .filter_map(|event| match event {
                QueueEvent::Installed(job) => Some(job.clone()),
                QueueEvent::Cancelled(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue_periodic(&self, job: PeriodicJob) -> BackupResult<()> {
        if let Some(delay) = self.install_delay {
            tokio::time::sleep(delay).await;
        }

        let mut jobs = self.jobs.write();
        if !job.replace_existing && jobs.contains_key(&job.name) {
            return Ok(());
        }
        jobs.insert(job.name.clone(), EnqueuedJob::installed(&job));
        self.history.lock().push(QueueEvent::Installed(job));
        Ok(())
    }

    async fn cancel(&self, name: &str) -> BackupResult<()> {
        if self.jobs.write().remove(name).is_some() {
            self.history
                .lock()
                .push(QueueEvent::Cancelled(name.to_string()));
        }
        Ok(())
    }

    async fn list_enqueued(&self, name: &str) -> BackupResult<Vec<EnqueuedJob>> {
        Ok(self.jobs.read().get(name).cloned().into_iter().collect())
    }
}

struct RunningJob {
    status: Arc<Mutex<EnqueuedJob>>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Job queue that runs registered workers on tokio timers.
///
/// Each installed job is a task that waits one interval, runs the worker
/// registered under the job's name, and repeats. A run in progress is
/// allowed to finish when its job is cancelled or replaced.
///
/// Constraints are recorded and reported but not enforced; network
/// metering is a platform concern.
pub struct TokioJobQueue {
    workers: RwLock<HashMap<String, Arc<dyn JobWorker>>>,
    jobs: Mutex<HashMap<String, RunningJob>>,
    shutdown: CancellationToken,
}

impl Default for TokioJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioJobQueue {
    /// Creates a queue with no workers.
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers the worker run by jobs called `name`.
    pub fn register(&self, name: impl Into<String>, worker: Arc<dyn JobWorker>) {
        self.workers.write().insert(name.into(), worker);
    }

    /// Stops every job and waits for runs in progress.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self
            .jobs
            .lock()
            .drain()
            .map(|(_, job)| job.handle)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "job task ended abnormally");
            }
        }
    }

    fn spawn_job(&self, job: &PeriodicJob, worker: Arc<dyn JobWorker>) -> RunningJob {
        let status = Arc::new(Mutex::new(EnqueuedJob::installed(job)));
        let token = self.shutdown.child_token();
        let name = job.name.clone();
        let interval = job.interval.max(Duration::from_millis(1));

        let handle = {
            let status = status.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    status.lock().state = JobState::Running;
                    tracing::debug!(job = %name, "job run started");
                    let outcome = worker.run().await;
                    match &outcome {
                        JobOutcome::Success => tracing::info!(job = %name, "job run succeeded"),
                        JobOutcome::Failure(reason) => {
                            tracing::warn!(job = %name, reason = %reason, "job run failed")
                        }
                    }

                    let mut current = status.lock();
                    current.state = JobState::Enqueued;
                    current.last_outcome = Some(outcome);
                }
                tracing::debug!(job = %name, "job stopped");
            })
        };

        RunningJob {
            status,
            token,
            handle,
        }
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn enqueue_periodic(&self, job: PeriodicJob) -> BackupResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        let worker = self
            .workers
            .read()
            .get(&job.name)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("no worker registered for job '{}'", job.name)))?;

        let mut jobs = self.jobs.lock();
        if !job.replace_existing && jobs.contains_key(&job.name) {
            return Ok(());
        }
        let running = self.spawn_job(&job, worker);
        if let Some(previous) = jobs.insert(job.name.clone(), running) {
            previous.token.cancel();
        }
        tracing::info!(job = %job.name, interval = ?job.interval, constraints = ?job.constraints, "job installed");
        Ok(())
    }

    async fn cancel(&self, name: &str) -> BackupResult<()> {
        if let Some(job) = self.jobs.lock().remove(name) {
            job.token.cancel();
            tracing::info!(job = %name, "job cancelled");
        }
        Ok(())
    }

    async fn list_enqueued(&self, name: &str) -> BackupResult<Vec<EnqueuedJob>> {
        Ok(self
            .jobs
            .lock()
            .get(name)
            .map(|job| job.status.lock().clone())
            .into_iter()
            .collect())
    }
}
