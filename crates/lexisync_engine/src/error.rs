//! Error types for the backup engine.

use lexisync_cloud::CloudError;
use std::io;
use thiserror::Error;

/// Result type for backup engine operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors that can occur during backup, restore and scheduling.
#[derive(Error, Debug)]
pub enum BackupError {
    /// No session, or the session was rejected.
    #[error("authentication required: {0}")]
    Auth(String),

    /// No backups exist, or the local store file is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// The remote call did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// Local read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Remote storage is full.
    #[error("storage quota exceeded: {0}")]
    Quota(String),

    /// Malformed provider response or invalid input.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transfer was cancelled.
    #[error("transfer cancelled")]
    Cancelled,

    /// Another backup or restore is already running.
    #[error("a transfer is already in progress")]
    TransferInProgress,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Settings could not be loaded or persisted.
    #[error("settings error: {0}")]
    Settings(String),

    /// A retryable failure kept happening.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last: Box<BackupError>,
    },
}

/// A `Copy` projection of [`BackupError`] kept in transfer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`BackupError::Auth`].
    Auth,
    /// See [`BackupError::NotFound`].
    NotFound,
    /// See [`BackupError::Network`].
    Network,
    /// See [`BackupError::Timeout`].
    Timeout,
    /// See [`BackupError::Io`].
    Io,
    /// See [`BackupError::Quota`].
    Quota,
    /// See [`BackupError::Protocol`].
    Protocol,
    /// See [`BackupError::Cancelled`].
    Cancelled,
    /// See [`BackupError::TransferInProgress`].
    TransferInProgress,
    /// See [`BackupError::InvalidStateTransition`].
    InvalidState,
    /// See [`BackupError::Settings`].
    Settings,
    /// See [`BackupError::RetriesExhausted`].
    RetriesExhausted,
}

impl BackupError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackupError::Network(_) | BackupError::Timeout)
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Auth(_) => ErrorKind::Auth,
            BackupError::NotFound(_) => ErrorKind::NotFound,
            BackupError::Network(_) => ErrorKind::Network,
            BackupError::Timeout => ErrorKind::Timeout,
            BackupError::Io(_) => ErrorKind::Io,
            BackupError::Quota(_) => ErrorKind::Quota,
            BackupError::Protocol(_) => ErrorKind::Protocol,
            BackupError::Cancelled => ErrorKind::Cancelled,
            BackupError::TransferInProgress => ErrorKind::TransferInProgress,
            BackupError::InvalidStateTransition { .. } => ErrorKind::InvalidState,
            BackupError::Settings(_) => ErrorKind::Settings,
            BackupError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }
}

impl From<CloudError> for BackupError {
    fn from(error: CloudError) -> Self {
        match error {
            CloudError::Auth(m) => BackupError::Auth(m),
            CloudError::NotFound(m) => BackupError::NotFound(m),
            CloudError::Network(m) => BackupError::Network(m),
            CloudError::Timeout => BackupError::Timeout,
            CloudError::Quota(m) => BackupError::Quota(m),
            CloudError::Io(e) => BackupError::Io(e),
            CloudError::Protocol(m) => BackupError::Protocol(m),
            CloudError::Cancelled => BackupError::Cancelled,
        }
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(error: serde_json::Error) -> Self {
        BackupError::Settings(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(BackupError::Network("reset".into()).is_retryable());
        assert!(BackupError::Timeout.is_retryable());
        assert!(!BackupError::Auth("expired".into()).is_retryable());
        assert!(!BackupError::Cancelled.is_retryable());
        assert!(!BackupError::RetriesExhausted {
            attempts: 3,
            last: Box::new(BackupError::Timeout),
        }
        .is_retryable());
    }

    #[test]
    fn cloud_errors_convert_losslessly() {
        let cases = [
            (CloudError::Auth("a".into()), ErrorKind::Auth),
            (CloudError::NotFound("n".into()), ErrorKind::NotFound),
            (CloudError::Network("n".into()), ErrorKind::Network),
            (CloudError::Timeout, ErrorKind::Timeout),
            (CloudError::Quota("q".into()), ErrorKind::Quota),
            (CloudError::Io(io::Error::other("x")), ErrorKind::Io),
            (CloudError::Protocol("p".into()), ErrorKind::Protocol),
            (CloudError::Cancelled, ErrorKind::Cancelled),
        ];
        for (cloud, kind) in cases {
            let retryable = cloud.is_retryable();
            let converted = BackupError::from(cloud);
            assert_eq!(converted.kind(), kind);
            assert_eq!(converted.is_retryable(), retryable);
        }
    }

    #[test]
    fn exhausted_error_mentions_last_failure() {
        let error = BackupError::RetriesExhausted {
            attempts: 3,
            last: Box::new(BackupError::Network("connection reset".into())),
        };
        let message = error.to_string();
        assert!(message.contains("3 attempts"));
        assert!(message.contains("connection reset"));
    }
}
