//! Error types for cloud storage operations.

use std::io;
use thiserror::Error;

/// Result type for cloud storage operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur while talking to a cloud storage provider.
#[derive(Debug, Error)]
pub enum CloudError {
    /// No session, or the session was rejected by the provider.
    #[error("authentication required: {0}")]
    Auth(String),

    /// The requested folder or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient transport failure (connection reset, throttling, 5xx).
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The remote storage is full.
    #[error("storage quota exceeded: {0}")]
    Quota(String),

    /// Local stream read/write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The provider answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transfer was cancelled by the caller.
    #[error("transfer cancelled")]
    Cancelled,
}

impl CloudError {
    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Network(_) | CloudError::Timeout)
    }
}

/// A cloneable description of a failure, used by fault-injecting providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Produces [`CloudError::Auth`].
    Auth,
    /// Produces [`CloudError::NotFound`].
    NotFound,
    /// Produces [`CloudError::Network`].
    Network,
    /// Produces [`CloudError::Timeout`].
    Timeout,
    /// Produces [`CloudError::Quota`].
    Quota,
    /// Produces [`CloudError::Io`].
    Io,
}

impl FaultKind {
    /// Builds the error this fault stands for.
    pub fn into_error(self, context: &str) -> CloudError {
        match self {
            FaultKind::Auth => CloudError::Auth(format!("injected: {context}")),
            FaultKind::NotFound => CloudError::NotFound(format!("injected: {context}")),
            FaultKind::Network => CloudError::Network(format!("injected: {context}")),
            FaultKind::Timeout => CloudError::Timeout,
            FaultKind::Quota => CloudError::Quota(format!("injected: {context}")),
            FaultKind::Io => CloudError::Io(io::Error::other(format!("injected: {context}"))),
        }
    }
}
