//! Retry policy
//!
//! One policy object per stage: how many attempts a stage gets and how long
//! to wait between them. Backoff is exponential with a cap.

use launchpad_core::domain::job::Stage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound for any single delay
    pub max_backoff_ms: u64,

    /// Growth factor applied after each retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            max_backoff_ms: max_backoff.as_millis() as u64,
            multiplier: 2.0,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the retry that follows attempt number `attempts_made`
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err(format!("retry.{}.max-attempts must be at least 1", name));
        }
        if self.multiplier < 1.0 {
            return Err(format!("retry.{}.multiplier must be >= 1.0", name));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(format!(
                "retry.{}.initial-backoff-ms cannot exceed max-backoff-ms",
                name
            ));
        }
        Ok(())
    }
}

/// Retry policies for every retryable stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryConfig {
    pub build: RetryPolicy,
    pub push: RetryPolicy,
    pub launch: RetryPolicy,
    /// Applies to consecutive failed status polls while running
    pub poll: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            build: RetryPolicy::default(),
            push: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            launch: RetryPolicy::default(),
            poll: RetryPolicy {
                max_attempts: 10,
                ..RetryPolicy::default()
            },
        }
    }
}

impl RetryConfig {
    /// Same policy for every stage
    #[cfg(test)]
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            build: policy,
            push: policy,
            launch: policy,
            poll: policy,
        }
    }

    pub fn for_stage(&self, stage: Stage) -> RetryPolicy {
        match stage {
            Stage::Building => self.build,
            Stage::Pushing => self.push,
            Stage::Launching => self.launch,
            Stage::Running => self.poll,
            _ => RetryPolicy::no_retry(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.build.validate("build")?;
        self.push.validate("push")?;
        self.launch.validate("launch")?;
        self.poll.validate("poll")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(500), Duration::from_secs(3));

        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(4), Duration::from_secs(3));
        assert_eq!(policy.backoff(30), Duration::from_secs(3));
    }

    #[test]
    fn test_should_retry_bound() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn test_stages_are_independently_configured() {
        let config = RetryConfig::default();
        assert_eq!(config.for_stage(Stage::Building).max_attempts, 3);
        assert_eq!(config.for_stage(Stage::Pushing).max_attempts, 5);
        assert_eq!(config.for_stage(Stage::Running).max_attempts, 10);
        assert_eq!(config.for_stage(Stage::Queued).max_attempts, 1);
    }

    #[test]
    fn test_validate() {
        assert!(RetryConfig::default().validate().is_ok());

        let mut config = RetryConfig::default();
        config.push.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RetryConfig::default();
        config.build.multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
