//! Transfer state machine.

use crate::error::{BackupError, BackupResult, ErrorKind};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Which kind of transfer an operation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Local store to remote.
    Backup,
    /// Remote to local store.
    Restore,
}

/// Lifecycle of one backup or restore operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// No operation.
    Idle,
    /// An operation is moving bytes.
    InProgress {
        /// Operation kind.
        kind: TransferKind,
        /// Percentage done, 0..=100.
        progress_percent: u8,
        /// Bytes moved so far.
        bytes_transferred: u64,
    },
    /// The operation finished.
    Success {
        /// Operation kind.
        kind: TransferKind,
    },
    /// The operation failed or was cancelled.
    Error {
        /// Operation kind.
        kind: TransferKind,
        /// Human-readable reason.
        message: String,
        /// Failure category.
        cause: ErrorKind,
    },
}

impl TransferState {
    /// Returns true while an operation is running.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, TransferState::InProgress { .. })
    }

    /// Returns true for `Success` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Success { .. } | TransferState::Error { .. }
        )
    }

    /// Returns the operation kind, if any.
    pub fn kind(&self) -> Option<TransferKind> {
        match self {
            TransferState::Idle => None,
            TransferState::InProgress { kind, .. }
            | TransferState::Success { kind }
            | TransferState::Error { kind, .. } => Some(*kind),
        }
    }

    /// Returns the state name without its payload.
    pub fn name(&self) -> &'static str {
        match self {
            TransferState::Idle => "Idle",
            TransferState::InProgress { .. } => "InProgress",
            TransferState::Success { .. } => "Success",
            TransferState::Error { .. } => "Error",
        }
    }
}

/// Owns the [`TransferState`] of one orchestrator.
///
/// Transitions happen atomically under the watch channel's lock and are
/// published to every subscriber.
///
/// # Transitions
///
/// ```text
/// Idle -> InProgress -> Success | Error -> Idle
/// ```
///
/// Late or duplicate notifications for an operation that already reached a
/// terminal state are dropped.
#[derive(Debug)]
pub struct TransferStateMachine {
    tx: watch::Sender<TransferState>,
    cancel: Mutex<CancellationToken>,
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStateMachine {
    /// Creates a state machine in `Idle`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TransferState::Idle);
        Self {
            tx,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> TransferState {
        self.tx.borrow().clone()
    }

    /// Returns a receiver that observes every transition.
    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.tx.subscribe()
    }

    /// Starts an operation and returns its cancellation token.
    ///
    /// Fails with [`BackupError::TransferInProgress`] while another operation
    /// runs, and with [`BackupError::InvalidStateTransition`] from a terminal
    /// state that has not been reset.
    pub fn start(&self, kind: TransferKind) -> BackupResult<CancellationToken> {
        let mut outcome = Err(BackupError::TransferInProgress);
        self.tx.send_if_modified(|state| match state {
            TransferState::Idle => {
                let token = CancellationToken::new();
                *self.cancel.lock() = token.clone();
                *state = TransferState::InProgress {
                    kind,
                    progress_percent: 0,
                    bytes_transferred: 0,
                };
                outcome = Ok(token);
                true
            }
            TransferState::InProgress { .. } => false,
            terminal => {
                outcome = Err(BackupError::InvalidStateTransition {
                    from: terminal.name().into(),
                    to: "InProgress".into(),
                });
                false
            }
        });
        if outcome.is_ok() {
            tracing::debug!(?kind, "transfer started");
        }
        outcome
    }

    /// Records progress. Returns false if the update was dropped.
    ///
    /// Percent is clamped to 100. Updates that would move either value
    /// backwards are dropped.
    pub fn report_progress(&self, percent: u8, bytes: u64) -> bool {
        let percent = percent.min(100);
        self.tx.send_if_modified(|state| match state {
            TransferState::InProgress {
                progress_percent,
                bytes_transferred,
                ..
            } => {
                if percent < *progress_percent || bytes < *bytes_transferred {
                    return false;
                }
                let changed = percent != *progress_percent || bytes != *bytes_transferred;
                *progress_percent = percent;
                *bytes_transferred = bytes;
                changed
            }
            _ => false,
        })
    }

    /// Moves a running operation to `Success`.
    pub fn complete(&self) -> bool {
        self.tx.send_if_modified(|state| match state {
            TransferState::InProgress { kind, .. } => {
                *state = TransferState::Success { kind: *kind };
                true
            }
            _ => false,
        })
    }

    /// Moves a running operation to `Error`.
    pub fn fail(&self, error: &BackupError) -> bool {
        self.tx.send_if_modified(|state| match state {
            TransferState::InProgress { kind, .. } => {
                *state = TransferState::Error {
                    kind: *kind,
                    message: error.to_string(),
                    cause: error.kind(),
                };
                true
            }
            _ => false,
        })
    }

    /// Cancels a running operation.
    ///
    /// The state moves to `Error` with cause `Cancelled` and the operation's
    /// token fires so its I/O unwinds.
    pub fn cancel(&self) -> bool {
        let cancelled = self.tx.send_if_modified(|state| match state {
            TransferState::InProgress { kind, .. } => {
                *state = TransferState::Error {
                    kind: *kind,
                    message: BackupError::Cancelled.to_string(),
                    cause: ErrorKind::Cancelled,
                };
                self.cancel.lock().cancel();
                true
            }
            _ => false,
        });
        if cancelled {
            tracing::info!("transfer cancelled");
        }
        cancelled
    }

    /// Returns to `Idle`. Refused while an operation is running.
    pub fn reset(&self) -> BackupResult<()> {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|state| match state {
            TransferState::InProgress { .. } => {
                outcome = Err(BackupError::InvalidStateTransition {
                    from: state.name().into(),
                    to: "Idle".into(),
                });
                false
            }
            TransferState::Idle => false,
            _ => {
                *state = TransferState::Idle;
                true
            }
        });
        outcome
    }
}
