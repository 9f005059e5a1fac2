//! # LexiSync Engine
//!
//! Backup and restore of the LexiSync dictionary database.
//!
//! This crate provides:
//! - Transfer state machine (idle → in progress → success | error)
//! - Backup and restore orchestration with single-backup retention
//! - Retry with linear or exponential backoff
//! - Settings-driven periodic scheduling of backups and reminders
//! - Job queue abstraction with in-memory and tokio implementations
//!
//! ## Architecture
//!
//! Settings changes flow through a `watch` channel into two schedulers,
//! which install or cancel named recurring jobs. The backup job runs the
//! [`BackupOrchestrator`], which moves bytes through a
//! [`lexisync_cloud::CloudStorageClient`] while reporting progress to the
//! [`TransferStateMachine`].
//!
//! ## Key Invariants
//!
//! - At most one remote backup exists while no transfer runs
//! - Only one backup or restore is in progress at a time
//! - Restore never leaves a partially written local store
//! - Only the newest settings value is ever applied by a scheduler

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod jobs;
mod orchestrator;
mod retry;
mod scheduler;
mod settings;
mod state;
mod store;
mod worker;

pub use config::{Backoff, EngineConfig, OrchestratorConfig, RetryConfig};
pub use engine::BackupEngine;
pub use error::{BackupError, BackupResult, ErrorKind};
pub use jobs::{
    EnqueuedJob, InMemoryJobQueue, JobConstraints, JobOutcome, JobQueue, JobState, JobWorker,
    PeriodicJob, QueueEvent, TokioJobQueue,
};
pub use orchestrator::{backup_file_name, BackupOrchestrator};
pub use retry::RetryPolicy;
pub use scheduler::{
    backup_interval, reminder_interval, Cadence, DesiredSchedule, PeriodicScheduler,
    ScheduleState, BACKUP_JOB_NAME, REMINDER_JOB_NAME,
};
pub use settings::{
    AutomaticBackupFrequency, BackupSettings, FileSettingsStore, MemorySettingsStore,
    SettingsFileWatch, SettingsStore, SettingsUpdate, DEFAULT_REMINDER_MINUTES, MAX_REMINDER_MINUTES,
    MIN_REMINDER_MINUTES,
};
pub use state::{TransferKind, TransferState, TransferStateMachine};
pub use store::{FileLocalStore, LocalStore};
pub use worker::{BackupJob, BackupReminder, Notifier, ReminderJob, TracingNotifier};
