//! Engine wiring: the two schedulers and their job queue.

use crate::config::EngineConfig;
use crate::jobs::{JobQueue, TokioJobQueue};
use crate::orchestrator::BackupOrchestrator;
use crate::retry::RetryPolicy;
use crate::scheduler::{Cadence, PeriodicScheduler, BACKUP_JOB_NAME, REMINDER_JOB_NAME};
use crate::settings::SettingsStore;
use crate::worker::{BackupJob, Notifier, ReminderJob};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs the backup and reminder schedulers against one settings store.
///
/// ```no_run
/// # use lexisync_engine::*;
/// # use std::sync::Arc;
/// # async fn demo(orchestrator: Arc<BackupOrchestrator>, settings: Arc<dyn SettingsStore>) {
/// let engine = BackupEngine::with_tokio_queue(
///     orchestrator,
///     settings,
///     Arc::new(TracingNotifier),
///     EngineConfig::default(),
/// );
/// engine.start();
/// // ...
/// engine.shutdown().await;
/// # }
/// ```
pub struct BackupEngine {
    backup: Arc<PeriodicScheduler>,
    reminder: Arc<PeriodicScheduler>,
    settings: Arc<dyn SettingsStore>,
    runner: Option<Arc<TokioJobQueue>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackupEngine {
    /// Creates an engine that installs jobs into `queue`.
    pub fn new(queue: Arc<dyn JobQueue>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            backup: Arc::new(PeriodicScheduler::new(Cadence::Backup, queue.clone())),
            reminder: Arc::new(PeriodicScheduler::new(Cadence::Reminder, queue)),
            settings,
            runner: None,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Creates an engine that runs its jobs in-process.
    ///
    /// The backup job runs `orchestrator` and the reminder job hands
    /// reminders to `notifier`, both under the configured retry policy.
    pub fn with_tokio_queue(
        orchestrator: Arc<BackupOrchestrator>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let queue = Arc::new(TokioJobQueue::new());
        let mut engine = Self::new(queue.clone(), settings.clone());
        let retry = RetryPolicy::new(config.retry);

        queue.register(
            BACKUP_JOB_NAME,
            Arc::new(
                BackupJob::new(orchestrator, retry.clone())
                    .with_cancel(engine.shutdown.child_token()),
            ),
        );
        queue.register(
            REMINDER_JOB_NAME,
            Arc::new(
                ReminderJob::new(settings, notifier, retry)
                    .with_cancel(engine.shutdown.child_token()),
            ),
        );
        engine.runner = Some(queue);
        engine
    }

    /// Returns the backup scheduler.
    pub fn backup_scheduler(&self) -> &Arc<PeriodicScheduler> {
        &self.backup
    }

    /// Returns the reminder scheduler.
    pub fn reminder_scheduler(&self) -> &Arc<PeriodicScheduler> {
        &self.reminder
    }

    /// Starts both schedulers. Calling it again has no effect.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::warn!("backup engine already started");
            return;
        }
        for scheduler in [&self.backup, &self.reminder] {
            tasks.push(
                Arc::clone(scheduler).spawn(self.settings.subscribe(), self.shutdown.clone()),
            );
        }
        tracing::info!("backup engine started");
    }

    /// Stops the schedulers and any in-process jobs, and waits for them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        if let Some(runner) = &self.runner {
            runner.shutdown().await;
        }
        tracing::info!("backup engine stopped");
    }
}
