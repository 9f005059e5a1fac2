//! Bounded-attempt retry with backoff.

use crate::config::RetryConfig;
use crate::error::{BackupError, BackupResult};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Runs an operation until it succeeds, fails fatally, or runs out of attempts.
///
/// Only [retryable](BackupError::is_retryable) errors are retried. Fatal
/// errors are returned unchanged on the attempt that produced them. After
/// `max_attempts` retryable failures the result is
/// [`BackupError::RetriesExhausted`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `op`, passing the 1-indexed attempt number.
    ///
    /// Waiting between attempts stops early with [`BackupError::Cancelled`]
    /// when `cancel` fires.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> BackupResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = BackupResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "retries exhausted");
                return Err(BackupError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self.config.delay_for_attempt(attempt);
            tracing::info!(attempt, ?delay, error = %error, "retrying after transient failure");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BackupError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig::new(max_attempts).with_base_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Mutex::new(Vec::new());
        let result = fast(3)
            .run(&CancellationToken::new(), |attempt| {
                attempts.lock().push(attempt);
                async move {
                    if attempt < 3 {
                        Err(BackupError::Network("reset".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(*attempts.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fatal_error_skips_retries() {
        let calls = Mutex::new(0);
        let result: BackupResult<()> = fast(5)
            .run(&CancellationToken::new(), |_| {
                *calls.lock() += 1;
                async { Err(BackupError::Auth("expired".into())) }
            })
            .await;

        assert!(matches!(result, Err(BackupError::Auth(_))));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_error() {
        let result: BackupResult<()> = fast(2)
            .run(&CancellationToken::new(), |_| async {
                Err(BackupError::Timeout)
            })
            .await;

        match result {
            Err(BackupError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, BackupError::Timeout));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = Mutex::new(0);
        let _ = fast(0)
            .run(&CancellationToken::new(), |_| {
                *calls.lock() += 1;
                async { Ok::<_, BackupError>(()) }
            })
            .await;
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy::new(
            RetryConfig::new(3).with_base_delay(Duration::from_secs(3600)),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: BackupResult<()> = policy
            .run(&cancel, |_| async { Err(BackupError::Network("down".into())) })
            .await;
        assert!(matches!(result, Err(BackupError::Cancelled)));
    }
}
