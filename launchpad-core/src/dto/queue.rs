//! Upstream launch queue DTOs
//!
//! The agent can pull launch requests from an upstream queue service and
//! report their results back once they reach a terminal stage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{JobResult, Stage};
use crate::domain::launch::LaunchSpec;

/// A launch request waiting in the upstream queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLaunch {
    /// Upstream identifier of the request
    pub id: String,
    pub spec: LaunchSpec,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

/// Agent registration with the upstream queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgent {
    pub agent_id: String,
    pub project: String,
    /// Configured slot count (`None` = unbounded)
    pub max_jobs: Option<usize>,
}

/// Acknowledges that the agent took a launch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckLaunch {
    pub agent_id: String,
    pub job_id: Uuid,
}

/// Final report for a launch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchReport {
    pub agent_id: String,
    pub job_id: Uuid,
    pub stage: Stage,
    pub image: Option<String>,
    pub result: Option<JobResult>,
}
