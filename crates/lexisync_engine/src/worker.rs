//! Workers run by the scheduled backup and reminder jobs.

use crate::error::BackupResult;
use crate::jobs::{JobOutcome, JobWorker};
use crate::orchestrator::BackupOrchestrator;
use crate::retry::RetryPolicy;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one backup, retrying transient failures.
pub struct BackupJob {
    orchestrator: Arc<BackupOrchestrator>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl BackupJob {
    /// Creates the worker.
    pub fn new(orchestrator: Arc<BackupOrchestrator>, retry: RetryPolicy) -> Self {
        Self {
            orchestrator,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops waiting between attempts once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl JobWorker for BackupJob {
    async fn run(&self) -> JobOutcome {
        let result = self
            .retry
            .run(&self.cancel, |attempt| async move {
                tracing::debug!(attempt, "scheduled backup attempt");
                self.orchestrator.backup().await
            })
            .await;

        match result {
            Ok(meta) => {
                tracing::info!(id = %meta.id, "scheduled backup succeeded");
                JobOutcome::Success
            }
            Err(e) => {
                tracing::error!(error = %e, "scheduled backup failed");
                JobOutcome::Failure(e.to_string())
            }
        }
    }
}

/// Payload of a backup reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReminder {
    /// When the last successful backup was taken.
    pub last_backup_at: Option<DateTime<Utc>>,
}

/// Presents reminders to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Shows `reminder`.
    async fn notify(&self, reminder: &BackupReminder) -> BackupResult<()>;
}

/// Notifier that writes reminders to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, reminder: &BackupReminder) -> BackupResult<()> {
        match reminder.last_backup_at {
            Some(at) => tracing::info!(last_backup_at = %at, "time to back up your dictionary"),
            None => tracing::info!("time to back up your dictionary; no backup exists yet"),
        }
        Ok(())
    }
}

/// Sends a backup reminder when reminders are enabled.
pub struct ReminderJob {
    settings: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ReminderJob {
    /// Creates the worker.
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            settings,
            notifier,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops waiting between attempts once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
impl JobWorker for ReminderJob {
    async fn run(&self) -> JobOutcome {
        let settings = self.settings.get();
        if !settings.reminder_enabled {
            tracing::debug!("reminders disabled, skipping");
            return JobOutcome::Success;
        }

        let reminder = BackupReminder {
            last_backup_at: settings.last_backup_at,
        };
        let result = self
            .retry
            .run(&self.cancel, |_| self.notifier.notify(&reminder))
            .await;
        match result {
            Ok(()) => JobOutcome::Success,
            Err(e) => JobOutcome::Failure(e.to_string()),
        }
    }
}
