//! Configuration for the backup engine.

use lexisync_cloud::BACKUP_MIME_TYPE;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base_delay * attempt`.
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`.
    Exponential {
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit the backoff is computed from.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Delay growth strategy.
    pub backoff: Backoff,
}

impl RetryConfig {
    /// Creates a configuration with linear backoff from a 30 second base.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            backoff: Backoff::Linear,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff: Backoff::Linear,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff strategy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay before retrying after `attempt` failed attempts (1-indexed).
    ///
    /// Attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.base_delay.as_secs_f64();
        let secs = match self.backoff {
            Backoff::Linear => base * f64::from(attempt),
            Backoff::Exponential { multiplier } => {
                base * multiplier.powi(attempt.saturating_sub(1) as i32)
            }
        };
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for [`crate::BackupOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Name of the remote folder holding the backup.
    pub folder_name: String,
    /// MIME type of uploaded backups.
    pub mime_type: String,
    /// Backup file base name. Defaults to the store file stem.
    pub base_name: Option<String>,
}

impl OrchestratorConfig {
    /// Sets the remote folder name.
    pub fn with_folder_name(mut self, name: impl Into<String>) -> Self {
        self.folder_name = name.into();
        self
    }

    /// Sets the backup file base name.
    pub fn with_base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = Some(name.into());
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            folder_name: "Backups".into(),
            mime_type: BACKUP_MIME_TYPE.into(),
            base_name: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Orchestrator settings.
    pub orchestrator: OrchestratorConfig,
    /// Retry settings for scheduled jobs.
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Sets the orchestrator configuration.
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(30));
        assert_eq!(config.backoff, Backoff::Linear);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(5), Duration::ZERO);
    }

    #[test]
    fn linear_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(90));
    }

    #[test]
    fn exponential_delay_is_capped() {
        let config = RetryConfig::new(10)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff(Backoff::Exponential { multiplier: 2.0 });
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(8), Duration::from_secs(10));
    }

    #[test]
    fn orchestrator_config_builder() {
        let config = OrchestratorConfig::default()
            .with_folder_name("Dict")
            .with_base_name("words");
        assert_eq!(config.folder_name, "Dict");
        assert_eq!(config.base_name.as_deref(), Some("words"));
        assert_eq!(config.mime_type, BACKUP_MIME_TYPE);
    }
}
