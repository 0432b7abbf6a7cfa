//! Upstream launch queue endpoints

use crate::LaunchClient;
use crate::error::Result;
use launchpad_core::dto::queue::{AckLaunch, LaunchReport, PendingLaunch, RegisterAgent};

impl LaunchClient {
    // =============================================================================
    // Agent Registration
    // =============================================================================

    /// Register an agent with the launch queue
    ///
    /// # Arguments
    /// * `req` - The registration request
    pub async fn register_agent(&self, req: &RegisterAgent) -> Result<()> {
        let url = format!("{}/api/agents/register", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_empty_response(response).await
    }

    /// Send a heartbeat for a registered agent
    ///
    /// # Arguments
    /// * `agent_id` - The agent identifier
    pub async fn send_heartbeat(&self, agent_id: &str) -> Result<()> {
        let url = format!("{}/api/agents/{}/heartbeat", self.base_url, agent_id);
        let response = self.client.post(&url).send().await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Launch Requests
    // =============================================================================

    /// Fetch launch requests waiting in a project's queue
    ///
    /// # Arguments
    /// * `project` - The project whose queue is polled
    /// * `agent_id` - The polling agent
    /// * `limit` - Maximum number of requests to return
    pub async fn pending_launches(
        &self,
        project: &str,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<PendingLaunch>> {
        let url = format!("{}/api/projects/{}/launches/pending", self.base_url, project);
        let response = self
            .client
            .get(&url)
            .query(&[("agent_id", agent_id.to_string()), ("limit", limit.to_string())])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Acknowledge that the agent took a launch request
    ///
    /// # Arguments
    /// * `project` - The project the request belongs to
    /// * `launch_id` - The upstream request identifier
    /// * `ack` - Agent and local job identifiers
    pub async fn ack_launch(&self, project: &str, launch_id: &str, ack: &AckLaunch) -> Result<()> {
        let url = format!(
            "{}/api/projects/{}/launches/{}/ack",
            self.base_url, project, launch_id
        );
        let response = self.client.post(&url).json(ack).send().await?;

        self.handle_empty_response(response).await
    }

    /// Report the final state of a launch request
    ///
    /// # Arguments
    /// * `project` - The project the request belongs to
    /// * `launch_id` - The upstream request identifier
    /// * `report` - Terminal stage and result of the local job
    pub async fn report_result(
        &self,
        project: &str,
        launch_id: &str,
        report: &LaunchReport,
    ) -> Result<()> {
        let url = format!(
            "{}/api/projects/{}/launches/{}/result",
            self.base_url, project, launch_id
        );
        let response = self.client.post(&url).json(report).send().await?;

        self.handle_empty_response(response).await
    }
}
