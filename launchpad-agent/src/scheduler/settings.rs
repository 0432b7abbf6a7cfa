//! Scheduler settings
//!
//! The immutable subset of the agent configuration the scheduler runs with,
//! with durations already resolved.

use launchpad_core::domain::job::Stage;
use std::time::Duration;

use crate::config::{AgentConfig, SlotRelease};
use crate::retry::RetryConfig;

/// Per-stage maximum durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub build: Duration,
    pub push: Duration,
    pub launch: Duration,
    pub poll: Duration,
    /// Bound on the whole running stage
    pub run: Option<Duration>,
}

impl Timeouts {
    /// Bound on one adapter call made in `stage`
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Building => self.build,
            Stage::Pushing => self.push,
            Stage::Launching => self.launch,
            _ => self.poll,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Slot count, `None` when unbounded
    pub capacity: Option<usize>,
    /// Bound on waiting jobs, `None` when unbounded
    pub max_queue: Option<usize>,
    pub slot_release: SlotRelease,
    pub retry: RetryConfig,
    pub timeouts: Timeouts,
    pub poll_interval: Duration,
    pub cancel_grace: Duration,
    pub history_limit: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for SchedulerSettings {
    fn from(config: &AgentConfig) -> Self {
        let scheduler = &config.scheduler;
        let t = &scheduler.timeouts;

        Self {
            capacity: config.capacity(),
            max_queue: config.max_queue,
            slot_release: scheduler.slot_release,
            retry: scheduler.retry,
            timeouts: Timeouts {
                build: Duration::from_secs(t.build_secs),
                push: Duration::from_secs(t.push_secs),
                launch: Duration::from_secs(t.launch_secs),
                poll: Duration::from_secs(t.poll_secs),
                run: t.run_secs.map(Duration::from_secs),
            },
            poll_interval: scheduler.poll_interval(),
            cancel_grace: scheduler.cancel_grace(),
            history_limit: scheduler.history_limit,
        }
    }
}

impl SchedulerSettings {
    /// Settings with the given slot count (negative = unbounded)
    #[cfg(test)]
    pub fn with_max_jobs(max_jobs: i64) -> Self {
        Self {
            capacity: usize::try_from(max_jobs).ok(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = AgentConfig::default();
        config.max_jobs = -1;
        config.scheduler.timeouts.run_secs = Some(120);

        let settings = SchedulerSettings::from(&config);
        assert_eq!(settings.capacity, None);
        assert_eq!(settings.timeouts.run, Some(Duration::from_secs(120)));
        assert_eq!(settings.timeouts.for_stage(Stage::Pushing), Duration::from_secs(900));
        assert_eq!(settings.cancel_grace, Duration::from_secs(30));
    }

    #[test]
    fn test_with_max_jobs() {
        assert_eq!(SchedulerSettings::with_max_jobs(3).capacity, Some(3));
        assert_eq!(SchedulerSettings::with_max_jobs(-5).capacity, None);
    }
}
