//! Session and credential contract.

use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// An authenticated session with a cloud provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Account the session belongs to.
    pub account: String,
    /// Bearer token sent with every request.
    pub access_token: String,
    /// When the token stops being accepted, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a session without an expiry.
    pub fn new(account: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// Sets the expiry time.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the session is usable at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Source of the current session.
///
/// Authentication itself (consent screens, token refresh) happens outside
/// this crate; providers only ask for the current session and drop it when
/// the remote side rejects it.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Returns the current session, or `None` if signed out or expired.
    async fn current_session(&self) -> Option<Session>;

    /// Establishes a new session.
    async fn authenticate(&self) -> CloudResult<Session>;

    /// Forgets the current session.
    async fn invalidate(&self);
}

/// Returns the current session or an [`CloudError::Auth`] error.
pub async fn require_session(provider: &dyn SessionProvider) -> CloudResult<Session> {
    provider
        .current_session()
        .await
        .ok_or_else(|| CloudError::Auth("no active session".into()))
}

/// An in-process session provider.
///
/// Holds at most one session. `authenticate` re-establishes the configured
/// credential, if any.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    current: RwLock<Option<Session>>,
    credential: RwLock<Option<Session>>,
}

impl StaticSessionProvider {
    /// Creates a provider with no session and no credential.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Creates a provider that is signed in with `session`.
    ///
    /// The session also serves as the credential for later `authenticate` calls.
    pub fn signed_in(session: Session) -> Self {
        Self {
            current: RwLock::new(Some(session.clone())),
            credential: RwLock::new(Some(session)),
        }
    }

    /// Replaces the current session.
    pub fn set_session(&self, session: Option<Session>) {
        *self.current.write() = session;
    }

    /// Replaces the credential used by `authenticate`.
    pub fn set_credential(&self, session: Option<Session>) {
        *self.credential.write() = session;
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Option<Session> {
        let current = self.current.read().clone()?;
        current.is_valid(Utc::now()).then_some(current)
    }

    async fn authenticate(&self) -> CloudResult<Session> {
        let session = self
            .credential
            .read()
            .clone()
            .ok_or_else(|| CloudError::Auth("no credential configured".into()))?;
        *self.current.write() = Some(session.clone());
        Ok(session)
    }

    async fn invalidate(&self) {
        self.current.write().take();
    }
}
