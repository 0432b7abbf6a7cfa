//! Agent API endpoints

use crate::LaunchClient;
use crate::error::Result;
use launchpad_core::domain::job::JobRecord;
use launchpad_core::domain::launch::LaunchSpec;
use launchpad_core::dto::agent::{AgentStats, ShutdownRequest};
use launchpad_core::dto::job::{CancelAccepted, JobSummary, SubmitLaunch, SubmitResponse};
use uuid::Uuid;

impl LaunchClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Submit a launch to the agent
    ///
    /// # Arguments
    /// * `spec` - The launch specification
    ///
    /// # Returns
    /// The identifier assigned to the new job
    ///
    /// # Example
    /// ```no_run
    /// # use launchpad_client::LaunchClient;
    /// # use launchpad_core::domain::launch::LaunchSpec;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = LaunchClient::new("http://localhost:8080");
    /// let submitted = client
    ///     .submit_launch(LaunchSpec::from_context("./trainer").named("train"))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_launch(&self, spec: LaunchSpec) -> Result<SubmitResponse> {
        let url = format!("{}/api/jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SubmitLaunch { spec })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get the full record of a job
    ///
    /// # Arguments
    /// * `job_id` - The job UUID
    pub async fn get_job(&self, job_id: Uuid) -> Result<JobRecord> {
        let url = format!("{}/api/jobs/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List summaries of every job the agent still remembers
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let url = format!("{}/api/jobs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Request cancellation of a job
    ///
    /// The request is accepted as soon as the agent has recorded it; the job
    /// reaches `cancelled` once its current operation has been stopped.
    ///
    /// # Arguments
    /// * `job_id` - The job UUID
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<CancelAccepted> {
        let url = format!("{}/api/jobs/{}/cancel", self.base_url, job_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Agent
    // =============================================================================

    /// Get the agent's current capacity
    pub async fn agent_stats(&self) -> Result<AgentStats> {
        let url = format!("{}/api/agent/stats", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Ask the agent to shut down
    ///
    /// # Arguments
    /// * `drain` - Let active jobs finish instead of cancelling them
    pub async fn shutdown_agent(&self, drain: bool) -> Result<()> {
        let url = format!("{}/api/agent/shutdown", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ShutdownRequest { drain })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
