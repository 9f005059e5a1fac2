//! Configuration-driven installation of the recurring backup and reminder jobs.
//!
//! Each [`PeriodicScheduler`] watches the settings stream and keeps one
//! named job in the [`JobQueue`] in line with it. Only the newest settings
//! value is acted on: a value that arrives while the previous one is still
//! being applied cancels that work and starts over.

use crate::error::BackupResult;
use crate::jobs::{JobConstraints, JobQueue, PeriodicJob};
use crate::settings::{
    AutomaticBackupFrequency, BackupSettings, MAX_REMINDER_MINUTES, MIN_REMINDER_MINUTES,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Job name of the automatic backup.
pub const BACKUP_JOB_NAME: &str = "backup";
/// Job name of the backup reminder.
pub const REMINDER_JOB_NAME: &str = "reminder";

const HOUR: u64 = 60 * 60;

/// Interval of the automatic backup, or `None` when it is off.
pub fn backup_interval(frequency: AutomaticBackupFrequency) -> Option<Duration> {
    match frequency {
        AutomaticBackupFrequency::Off => None,
        AutomaticBackupFrequency::Daily => Some(Duration::from_secs(24 * HOUR)),
        AutomaticBackupFrequency::Weekly => Some(Duration::from_secs(7 * 24 * HOUR)),
        AutomaticBackupFrequency::Monthly => Some(Duration::from_secs(30 * 24 * HOUR)),
    }
}

/// Interval of the reminder, or `None` when reminders are disabled.
///
/// The configured minutes are clamped to 15..=180.
pub fn reminder_interval(settings: &BackupSettings) -> Option<Duration> {
    if !settings.reminder_enabled {
        return None;
    }
    let minutes = settings
        .reminder_interval_minutes
        .clamp(MIN_REMINDER_MINUTES, MAX_REMINDER_MINUTES);
    Some(Duration::from_secs(u64::from(minutes) * 60))
}

/// Which recurring job a scheduler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// The automatic backup.
    Backup,
    /// The backup reminder.
    Reminder,
}

/// What the job queue should hold for one job name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredSchedule {
    /// No job.
    Off,
    /// A job running every `interval`.
    Every {
        /// Time between runs.
        interval: Duration,
        /// Run conditions.
        constraints: JobConstraints,
    },
}

impl Cadence {
    /// Returns the job name.
    pub fn job_name(self) -> &'static str {
        match self {
            Cadence::Backup => BACKUP_JOB_NAME,
            Cadence::Reminder => REMINDER_JOB_NAME,
        }
    }

    /// Derives the desired schedule from `settings`.
    pub fn desired(self, settings: &BackupSettings) -> DesiredSchedule {
        let (interval, constraints) = match self {
            Cadence::Backup => (
                backup_interval(settings.automatic_backup_frequency),
                JobConstraints {
                    unmetered_network: !settings.use_mobile_data,
                },
            ),
            Cadence::Reminder => (reminder_interval(settings), JobConstraints::default()),
        };
        match interval {
            Some(interval) => DesiredSchedule::Every {
                interval,
                constraints,
            },
            None => DesiredSchedule::Off,
        }
    }
}

/// Last state a scheduler applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// No job installed.
    Unscheduled,
    /// A job is installed with this interval.
    Scheduled(Duration),
}

/// Keeps one named recurring job in line with the settings.
pub struct PeriodicScheduler {
    cadence: Cadence,
    queue: Arc<dyn JobQueue>,
    state: RwLock<ScheduleState>,
}

impl PeriodicScheduler {
    /// Creates a scheduler for `cadence`.
    pub fn new(cadence: Cadence, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            cadence,
            queue,
            state: RwLock::new(ScheduleState::Unscheduled),
        }
    }

    /// Returns the managed cadence.
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Returns the last applied state.
    pub fn state(&self) -> ScheduleState {
        *self.state.read()
    }

    /// Brings the job queue in line with `settings`.
    ///
    /// Cancelling is idempotent. A job already installed with the same
    /// interval and constraints is left alone; anything else is replaced.
    pub async fn apply(&self, settings: &BackupSettings) -> BackupResult<ScheduleState> {
        let name = self.cadence.job_name();

        let next = match self.cadence.desired(settings) {
            DesiredSchedule::Off => {
                self.queue.cancel(name).await?;
                tracing::debug!(job = name, "job off");
                ScheduleState::Unscheduled
            }
            DesiredSchedule::Every {
                interval,
                constraints,
            } => {
                let existing = self.queue.list_enqueued(name).await?;
                let current = existing
                    .iter()
                    .any(|job| job.interval == interval && job.constraints == constraints);
                if current {
                    tracing::debug!(job = name, ?interval, "job already scheduled");
                } else {
                    self.queue
                        .enqueue_periodic(PeriodicJob::new(name, interval).with_constraints(constraints))
                        .await?;
                    tracing::info!(job = name, ?interval, "job scheduled");
                }
                ScheduleState::Scheduled(interval)
            }
        };

        *self.state.write() = next;
        Ok(next)
    }

    /// Applies every settings value from `settings` until `shutdown` fires.
    ///
    /// A new value cancels the still-running application of the previous one
    /// and waits for it to unwind before starting over. When the settings
    /// sender goes away the last application is allowed to finish.
    pub fn spawn(
        self: Arc<Self>,
        mut settings: watch::Receiver<BackupSettings>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = self.cadence.job_name();
            let mut inflight: Option<(CancellationToken, JoinHandle<()>)> = None;

            let stopped = loop {
                let current = settings.borrow_and_update().clone();
                if let Some((token, handle)) = inflight.take() {
                    token.cancel();
                    let _ = handle.await;
                }

                let token = shutdown.child_token();
                let handle = {
                    let this = Arc::clone(&self);
                    let token = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                tracing::debug!(job = name, "superseded by newer settings");
                            }
                            result = this.apply(&current) => {
                                if let Err(e) = result {
                                    tracing::warn!(job = name, error = %e, "failed to apply schedule");
                                }
                            }
                        }
                    })
                };
                inflight = Some((token, handle));

                tokio::select! {
                    _ = shutdown.cancelled() => break true,
                    changed = settings.changed() => {
                        if changed.is_err() {
                            break false;
                        }
                    }
                }
            };

            if let Some((token, handle)) = inflight {
                if stopped {
                    token.cancel();
                }
                let _ = handle.await;
            }
            tracing::debug!(job = name, "scheduler stopped");
        })
    }
}
