//! Job DTOs for the agent API

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobRecord, JobResult, Stage};
use crate::domain::launch::LaunchSpec;

/// Request to submit a launch to the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitLaunch {
    pub spec: LaunchSpec,
}

/// Response to a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: Uuid,
}

/// Acknowledgement of a cancellation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAccepted {
    pub id: Uuid,
    /// Stage at the time the request was accepted
    pub stage: Stage,
}

/// Lightweight job summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub name: String,
    pub stage: Stage,
    pub image: Option<String>,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<JobResult>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            name: record.spec.display_name().to_string(),
            stage: record.stage,
            image: record
                .published
                .as_ref()
                .map(|p| p.reference.clone())
                .or_else(|| record.image.as_ref().map(|i| i.reference.clone())),
            submitted_at: record.submitted_at,
            completed_at: record.completed_at,
            result: record.result.clone(),
        }
    }
}
