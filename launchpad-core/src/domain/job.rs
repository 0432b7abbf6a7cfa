//! Job record domain types
//!
//! A job record tracks one launch request from submission to its terminal
//! state. The agent's scheduler is the only writer; everything else works on
//! snapshots. The mutation methods below enforce the pipeline invariants:
//! stages only move forward, a retry re-enters the same stage, and the built
//! image is recorded at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::launch::LaunchSpec;
use crate::domain::run::{ImageRef, PublishedRef, RunHandle};

/// Pipeline stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Queued,
    Building,
    Pushing,
    Launching,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl Stage {
    /// Terminal stages never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed | Stage::Cancelled)
    }

    /// Stages between admission and the terminal state
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Stage::Building | Stage::Pushing | Stage::Launching | Stage::Running
        )
    }

    /// Whether `self -> to` is a legal forward transition
    pub fn can_transition_to(self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }

        match to {
            Stage::Cancelled => true,
            Stage::Failed => self.is_active(),
            _ => matches!(
                (self, to),
                (Stage::Queued, Stage::Building)
                    | (Stage::Building, Stage::Pushing)
                    | (Stage::Pushing, Stage::Launching)
                    | (Stage::Launching, Stage::Running)
                    | (Stage::Running, Stage::Succeeded)
            ),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Queued => "Queued",
            Stage::Building => "Building",
            Stage::Pushing => "Pushing",
            Stage::Launching => "Launching",
            Stage::Running => "Running",
            Stage::Succeeded => "Succeeded",
            Stage::Failed => "Failed",
            Stage::Cancelled => "Cancelled",
        };
        write!(f, "{}", name)
    }
}

/// One entry of a job's stage history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    /// Attempt number within the stage (1 for the first attempt)
    pub attempt: u32,
    pub note: Option<String>,
}

/// Retry counters, one per retryable stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRetries {
    pub building: u32,
    pub pushing: u32,
    pub launching: u32,
    pub running: u32,
}

impl StageRetries {
    pub fn get(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Building => self.building,
            Stage::Pushing => self.pushing,
            Stage::Launching => self.launching,
            Stage::Running => self.running,
            _ => 0,
        }
    }

    fn increment(&mut self, stage: Stage) -> u32 {
        let counter = match stage {
            Stage::Building => &mut self.building,
            Stage::Pushing => &mut self.pushing,
            Stage::Launching => &mut self.launching,
            Stage::Running => &mut self.running,
            _ => return 0,
        };
        *counter += 1;
        *counter
    }
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,

    /// Stage the job was in when it ended (the failing stage on failure)
    pub stage: Stage,

    /// Human readable diagnostic
    pub error_message: Option<String>,

    /// Set when a cancellation was forced before the backend acknowledged it;
    /// the remote workload may still be running and needs cleanup
    pub remote_cleanup_required: bool,
}

/// Error returned when a mutation would break a job record invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: Stage, to: Stage },

    #[error("cannot retry stage {0}")]
    NotRetryable(Stage),

    #[error("image already recorded")]
    ImageAlreadySet,

    #[error("{artifact} can only be recorded while {expected}, job is {actual}")]
    WrongStage {
        artifact: &'static str,
        expected: Stage,
        actual: Stage,
    },
}

/// State tracked by the agent for one launch request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub spec: LaunchSpec,
    pub stage: Stage,
    pub image: Option<ImageRef>,
    pub published: Option<PublishedRef>,
    pub handle: Option<RunHandle>,
    pub result: Option<JobResult>,
    pub retries: StageRetries,
    pub history: Vec<StageTransition>,
    pub cancel_requested: bool,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a queued record for a freshly submitted spec
    pub fn new(id: Uuid, spec: LaunchSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            spec,
            stage: Stage::Queued,
            image: None,
            published: None,
            handle: None,
            result: None,
            retries: StageRetries::default(),
            history: vec![StageTransition {
                stage: Stage::Queued,
                at: now,
                attempt: 1,
                note: None,
            }],
            cancel_requested: false,
            submitted_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Current attempt number within the current stage
    pub fn attempt(&self) -> u32 {
        self.retries.get(self.stage) + 1
    }

    /// Moves the record to a new stage
    pub fn advance(
        &mut self,
        to: Stage,
        now: DateTime<Utc>,
        note: Option<String>,
    ) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.stage,
                to,
            });
        }

        if self.stage == Stage::Queued && to == Stage::Building {
            self.started_at = Some(now);
        }

        self.stage = to;
        self.history.push(StageTransition {
            stage: to,
            at: now,
            attempt: 1,
            note,
        });

        if to.is_terminal() {
            self.completed_at = Some(now);
        }

        Ok(())
    }

    /// Records a retry of the current stage and returns the new attempt number
    pub fn record_retry(
        &mut self,
        now: DateTime<Utc>,
        note: impl Into<String>,
    ) -> Result<u32, TransitionError> {
        if !self.stage.is_active() {
            return Err(TransitionError::NotRetryable(self.stage));
        }

        let retries = self.retries.increment(self.stage);
        self.history.push(StageTransition {
            stage: self.stage,
            at: now,
            attempt: retries + 1,
            note: Some(note.into()),
        });

        Ok(retries + 1)
    }

    /// Records the built image; only legal once, while building
    pub fn set_image(&mut self, image: ImageRef) -> Result<(), TransitionError> {
        if self.image.is_some() {
            return Err(TransitionError::ImageAlreadySet);
        }
        if self.stage != Stage::Building {
            return Err(TransitionError::WrongStage {
                artifact: "image",
                expected: Stage::Building,
                actual: self.stage,
            });
        }
        self.image = Some(image);
        Ok(())
    }

    /// Records the published image reference, while pushing
    pub fn set_published(&mut self, published: PublishedRef) -> Result<(), TransitionError> {
        if self.stage != Stage::Pushing {
            return Err(TransitionError::WrongStage {
                artifact: "published image",
                expected: Stage::Pushing,
                actual: self.stage,
            });
        }
        self.published = Some(published);
        Ok(())
    }

    /// Records the run handle, while launching
    pub fn set_handle(&mut self, handle: RunHandle) -> Result<(), TransitionError> {
        if self.stage != Stage::Launching {
            return Err(TransitionError::WrongStage {
                artifact: "run handle",
                expected: Stage::Launching,
                actual: self.stage,
            });
        }
        self.handle = Some(handle);
        Ok(())
    }

    /// Marks the job as succeeded
    pub fn succeed(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let stage = self.stage;
        self.advance(Stage::Succeeded, now, None)?;
        self.result = Some(JobResult {
            success: true,
            stage,
            error_message: None,
            remote_cleanup_required: false,
        });
        Ok(())
    }

    /// Marks the job as failed in its current stage
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let stage = self.stage;
        let reason = reason.into();
        self.advance(Stage::Failed, now, Some(reason.clone()))?;
        self.result = Some(JobResult {
            success: false,
            stage,
            error_message: Some(reason),
            remote_cleanup_required: false,
        });
        Ok(())
    }

    /// Marks the job as cancelled
    pub fn cancel(
        &mut self,
        now: DateTime<Utc>,
        note: impl Into<String>,
        remote_cleanup_required: bool,
    ) -> Result<(), TransitionError> {
        let stage = self.stage;
        let note = note.into();
        self.advance(Stage::Cancelled, now, Some(note.clone()))?;
        self.result = Some(JobResult {
            success: false,
            stage,
            error_message: Some(note),
            remote_cleanup_required,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            Uuid::new_v4(),
            LaunchSpec::from_context("./ctx"),
            Utc::now(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = record();
        let now = Utc::now();

        job.advance(Stage::Building, now, None).unwrap();
        assert!(job.started_at.is_some());
        job.set_image(ImageRef::local("localhost/ctx:1")).unwrap();
        job.advance(Stage::Pushing, now, None).unwrap();
        job.advance(Stage::Launching, now, None).unwrap();
        job.advance(Stage::Running, now, None).unwrap();
        job.succeed(now).unwrap();

        assert_eq!(job.stage, Stage::Succeeded);
        assert!(job.result.as_ref().unwrap().success);
        assert_eq!(job.result.as_ref().unwrap().stage, Stage::Running);
        assert!(job.completed_at.is_some());
        assert_eq!(job.history.len(), 6);
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut job = record();
        let now = Utc::now();
        job.advance(Stage::Building, now, None).unwrap();
        job.advance(Stage::Pushing, now, None).unwrap();

        assert_eq!(
            job.advance(Stage::Building, now, None),
            Err(TransitionError::Illegal {
                from: Stage::Pushing,
                to: Stage::Building
            })
        );
        assert!(job.advance(Stage::Running, now, None).is_err());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut job = record();
        let now = Utc::now();
        job.cancel(now, "user request", false).unwrap();

        assert!(job.is_terminal());
        assert!(job.cancel(now, "again", false).is_err());
        assert!(job.advance(Stage::Building, now, None).is_err());
    }

    #[test]
    fn test_queued_job_cannot_fail() {
        let mut job = record();
        assert!(job.fail(Utc::now(), "boom").is_err());
    }

    #[test]
    fn test_retry_reenters_same_stage() {
        let mut job = record();
        let now = Utc::now();
        job.advance(Stage::Building, now, None).unwrap();

        assert_eq!(job.record_retry(now, "network").unwrap(), 2);
        assert_eq!(job.record_retry(now, "network").unwrap(), 3);
        assert_eq!(job.stage, Stage::Building);
        assert_eq!(job.retries.get(Stage::Building), 2);
        assert_eq!(job.attempt(), 3);
    }

    #[test]
    fn test_retry_requires_active_stage() {
        let mut job = record();
        assert_eq!(
            job.record_retry(Utc::now(), "nope"),
            Err(TransitionError::NotRetryable(Stage::Queued))
        );
    }

    #[test]
    fn test_image_set_at_most_once() {
        let mut job = record();
        let now = Utc::now();

        assert!(job.set_image(ImageRef::local("a")).is_err());
        job.advance(Stage::Building, now, None).unwrap();
        job.set_image(ImageRef::local("a")).unwrap();
        assert_eq!(
            job.set_image(ImageRef::local("b")),
            Err(TransitionError::ImageAlreadySet)
        );
    }

    #[test]
    fn test_failure_records_stage_and_reason() {
        let mut job = record();
        let now = Utc::now();
        job.advance(Stage::Building, now, None).unwrap();
        job.advance(Stage::Pushing, now, None).unwrap();
        job.advance(Stage::Launching, now, None).unwrap();
        job.fail(now, "forbidden").unwrap();

        let result = job.result.unwrap();
        assert!(!result.success);
        assert_eq!(result.stage, Stage::Launching);
        assert_eq!(result.error_message.as_deref(), Some("forbidden"));
    }

    #[test]
    fn test_record_roundtrips_through_json() {
        let mut job = record();
        job.advance(Stage::Building, Utc::now(), None).unwrap();
        job.record_retry(Utc::now(), "throttled").unwrap();

        let json = serde_json::to_string(&job).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }
}
