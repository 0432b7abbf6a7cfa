//! Launch queue poller
//!
//! Registers the agent upstream, then on every tick asks the scheduler how
//! much work it can admit and pulls at most that many pending launches.
//! Terminal records arrive through a `ChannelSink` and are reported back to
//! the queue under the upstream identifier they came from.

use anyhow::{Context as AnyhowContext, Result};
use launchpad_client::LaunchClient;
use launchpad_core::domain::job::{JobRecord, JobResult, Stage};
use launchpad_core::dto::queue::{AckLaunch, LaunchReport, PendingLaunch, RegisterAgent};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::retry::RetryPolicy;
use crate::scheduler::AgentHandle;

/// Launches fetched per tick when the agent has no slot limit
const UNBOUNDED_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub base_url: String,
    pub project: String,
    pub agent_id: String,
    pub max_jobs: Option<usize>,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub registration: RetryPolicy,
}

impl QueueSettings {
    /// Queue settings, `None` when no upstream queue is configured
    pub fn from_config(config: &AgentConfig) -> Option<Self> {
        let base_url = config.base_url.clone()?;
        let project = config.project.clone()?;

        Some(Self {
            base_url,
            project,
            agent_id: config.agent_id.clone(),
            max_jobs: config.capacity(),
            poll_interval: Duration::from_secs(config.scheduler.queue_poll_interval_secs),
            heartbeat_interval: Duration::from_secs(config.scheduler.heartbeat_interval_secs),
            registration: RetryPolicy::new(10, Duration::from_millis(500), Duration::from_secs(30)),
        })
    }
}

/// Pulls launches from the upstream queue into the scheduler
pub struct QueuePoller {
    settings: QueueSettings,
    client: LaunchClient,
    agent: AgentHandle,
    results: mpsc::UnboundedReceiver<JobRecord>,
    /// Local job id -> upstream launch id
    origins: HashMap<Uuid, String>,
}

impl QueuePoller {
    /// Creates a poller
    ///
    /// # Arguments
    /// * `settings` - Upstream location and intervals
    /// * `agent` - Handle to the scheduler
    /// * `results` - Receiver of the `ChannelSink` registered with the scheduler
    pub fn new(
        settings: QueueSettings,
        agent: AgentHandle,
        results: mpsc::UnboundedReceiver<JobRecord>,
    ) -> Self {
        let client = LaunchClient::new(settings.base_url.clone());
        Self {
            settings,
            client,
            agent,
            results,
            origins: HashMap::new(),
        }
    }

    /// Runs until intake is stopped and every taken launch has been reported
    ///
    /// Cancelling `intake` stops fetching new launches; results of jobs
    /// already taken keep being reported. The poller also exits when the
    /// scheduler drops its result sink.
    pub async fn run(mut self, intake: CancellationToken) -> Result<()> {
        tokio::select! {
            registered = self.register_with_retry() => registered?,
            _ = intake.cancelled() => {
                info!("Shutdown requested before registration completed");
                return Ok(());
            }
        }

        let heartbeat = self.start_heartbeat_loop(intake.child_token());

        info!(
            "Polling launch queue for project '{}' (interval: {:?})",
            self.settings.project, self.settings.poll_interval
        );

        let mut ticker = time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut fetching = true;

        while fetching || !self.origins.is_empty() {
            tokio::select! {
                _ = intake.cancelled(), if fetching => {
                    info!("Launch queue intake stopped");
                    fetching = false;
                }
                _ = ticker.tick(), if fetching => {
                    match self.poll_once().await {
                        Ok(taken) if taken > 0 => info!("Took {} launch(es) from the queue", taken),
                        Ok(_) => {}
                        Err(e) => error!("Error during queue poll: {:#}", e),
                    }
                }
                record = self.results.recv() => match record {
                    Some(record) => self.report(&record).await,
                    None => break,
                },
            }
        }

        heartbeat.abort();
        if !self.origins.is_empty() {
            warn!(
                "{} launch(es) ended without a result report",
                self.origins.len()
            );
        }
        Ok(())
    }

    /// Registers with the queue, retrying with exponential backoff
    ///
    /// The queue service may not be reachable yet when the agent starts.
    async fn register_with_retry(&self) -> Result<()> {
        let policy = self.settings.registration;
        let request = RegisterAgent {
            agent_id: self.settings.agent_id.clone(),
            project: self.settings.project.clone(),
            max_jobs: self.settings.max_jobs,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.client.register_agent(&request).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            "Registered with launch queue after {} attempt(s)",
                            attempt
                        );
                    } else {
                        info!("Registered with launch queue");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if !policy.should_retry(attempt) {
                        error!(
                            "Failed to register with launch queue after {} attempts",
                            attempt
                        );
                        return Err(anyhow::anyhow!(
                            "Failed to register with launch queue: {}",
                            e
                        ));
                    }

                    let delay = policy.backoff(attempt);
                    warn!(
                        "Failed to register with launch queue (attempt {}/{}): {}",
                        attempt, policy.max_attempts, e
                    );
                    warn!("Retrying in {} ms...", delay.as_millis());
                    time::sleep(delay).await;
                }
            }
        }
    }

    /// Performs a single poll cycle, returning how many launches were taken
    async fn poll_once(&mut self) -> Result<usize> {
        let stats = self
            .agent
            .stats()
            .await
            .context("Failed to read scheduler capacity")?;
        let limit = stats.admissible(UNBOUNDED_BATCH);
        if limit == 0 {
            debug!("No free capacity, skipping queue poll");
            return Ok(0);
        }

        let launches = self
            .client
            .pending_launches(&self.settings.project, &self.settings.agent_id, limit)
            .await
            .context("Failed to fetch pending launches")?;

        if launches.is_empty() {
            debug!("No pending launches");
            return Ok(0);
        }

        let mut taken = 0;
        for launch in launches.into_iter().take(limit) {
            match self.take(launch).await {
                Ok(true) => taken += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Stopping queue intake for this cycle: {}", e);
                    break;
                }
            }
        }
        Ok(taken)
    }

    /// Submits one launch; `Ok(false)` when the launch was rejected upstream
    async fn take(&mut self, launch: PendingLaunch) -> Result<bool, AgentError> {
        let PendingLaunch { id: launch_id, spec, .. } = launch;

        let job_id = match self.agent.submit(spec).await {
            Ok(job_id) => job_id,
            Err(AgentError::InvalidSpec(reason)) => {
                warn!("Rejecting launch {}: {}", launch_id, reason);
                self.reject(&launch_id, reason).await;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        info!("Launch {} submitted as job {}", launch_id, job_id);

        let ack = AckLaunch {
            agent_id: self.settings.agent_id.clone(),
            job_id,
        };
        if let Err(e) = self
            .client
            .ack_launch(&self.settings.project, &launch_id, &ack)
            .await
        {
            warn!("Failed to acknowledge launch {}: {}", launch_id, e);
        }

        self.origins.insert(job_id, launch_id);
        Ok(true)
    }

    /// Reports a launch that never became a job
    async fn reject(&self, launch_id: &str, reason: String) {
        let report = LaunchReport {
            agent_id: self.settings.agent_id.clone(),
            job_id: Uuid::nil(),
            stage: Stage::Failed,
            image: None,
            result: Some(JobResult {
                success: false,
                stage: Stage::Queued,
                error_message: Some(format!("invalid launch spec: {}", reason)),
                remote_cleanup_required: false,
            }),
        };
        if let Err(e) = self
            .client
            .report_result(&self.settings.project, launch_id, &report)
            .await
        {
            warn!("Failed to report rejected launch {}: {}", launch_id, e);
        }
    }

    /// Reports a terminal record back to the launch it came from
    async fn report(&mut self, record: &JobRecord) {
        let Some(launch_id) = self.origins.remove(&record.id) else {
            debug!("Job {} was not taken from the queue, not reporting", record.id);
            return;
        };

        let report = LaunchReport {
            agent_id: self.settings.agent_id.clone(),
            job_id: record.id,
            stage: record.stage,
            image: record
                .published
                .as_ref()
                .map(|p| p.reference.clone())
                .or_else(|| record.image.as_ref().map(|i| i.reference.clone())),
            result: record.result.clone(),
        };

        match self
            .client
            .report_result(&self.settings.project, &launch_id, &report)
            .await
        {
            Ok(()) => debug!("Reported {} for launch {}", record.stage, launch_id),
            Err(e) => error!("Failed to report result for launch {}: {}", launch_id, e),
        }
    }

    /// Starts a background task to send heartbeats
    fn start_heartbeat_loop(&self, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let agent_id = self.settings.agent_id.clone();
        let interval = self.settings.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("Sending heartbeat");
                        if let Err(e) = client.send_heartbeat(&agent_id).await {
                            warn!("Failed to send heartbeat: {:#}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::scripted::{Script, ScriptedBackend};
    use crate::scheduler::{Agent, ChannelSink, SchedulerSettings};
    use axum::extract::{Path, Query, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use launchpad_core::domain::launch::LaunchSpec;
    use std::sync::{Arc, Mutex};

    /// In-memory stand-in for the upstream queue service
    #[derive(Default)]
    struct Upstream {
        pending: Vec<PendingLaunch>,
        register_failures: u32,
        registrations: u32,
        heartbeats: u32,
        limits: Vec<usize>,
        acks: Vec<(String, Uuid)>,
        reports: Vec<(String, LaunchReport)>,
    }

    type Shared = Arc<Mutex<Upstream>>;

    async fn register(State(up): State<Shared>, Json(_): Json<RegisterAgent>) -> StatusCode {
        let mut up = up.lock().unwrap();
        up.registrations += 1;
        if up.register_failures > 0 {
            up.register_failures -= 1;
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        StatusCode::NO_CONTENT
    }

    async fn heartbeat(State(up): State<Shared>) -> StatusCode {
        up.lock().unwrap().heartbeats += 1;
        StatusCode::NO_CONTENT
    }

    async fn pending(
        State(up): State<Shared>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Vec<PendingLaunch>> {
        let mut up = up.lock().unwrap();
        let limit: usize = params["limit"].parse().unwrap();
        up.limits.push(limit);
        let n = limit.min(up.pending.len());
        Json(up.pending.drain(..n).collect())
    }

    async fn ack(
        State(up): State<Shared>,
        Path((_, id)): Path<(String, String)>,
        Json(ack): Json<AckLaunch>,
    ) -> StatusCode {
        up.lock().unwrap().acks.push((id, ack.job_id));
        StatusCode::NO_CONTENT
    }

    async fn result(
        State(up): State<Shared>,
        Path((_, id)): Path<(String, String)>,
        Json(report): Json<LaunchReport>,
    ) -> StatusCode {
        up.lock().unwrap().reports.push((id, report));
        StatusCode::NO_CONTENT
    }

    async fn serve(upstream: Shared) -> String {
        let app = Router::new()
            .route("/api/agents/register", post(register))
            .route("/api/agents/{id}/heartbeat", post(heartbeat))
            .route("/api/projects/{project}/launches/pending", get(pending))
            .route("/api/projects/{project}/launches/{id}/ack", post(ack))
            .route("/api/projects/{project}/launches/{id}/result", post(result))
            .with_state(upstream);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn settings(base_url: String) -> QueueSettings {
        QueueSettings {
            base_url,
            project: "vision".to_string(),
            agent_id: "agent-1".to_string(),
            max_jobs: Some(1),
            poll_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(20),
            registration: RetryPolicy::new(5, Duration::from_millis(5), Duration::from_millis(20)),
        }
    }

    fn launch(id: &str, spec: LaunchSpec) -> PendingLaunch {
        PendingLaunch {
            id: id.to_string(),
            spec,
            enqueued_at: chrono::Utc::now(),
        }
    }

    async fn wait_for(upstream: &Shared, predicate: impl Fn(&Upstream) -> bool) {
        for _ in 0..500 {
            if predicate(&upstream.lock().unwrap()) {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upstream never reached the expected state");
    }

    #[tokio::test]
    async fn test_launches_flow_through_scheduler_and_back() {
        let upstream: Shared = Arc::default();
        {
            let mut up = upstream.lock().unwrap();
            up.register_failures = 2;
            up.pending = vec![
                launch("q-1", LaunchSpec::from_image("alpine:3").named("first")),
                launch("q-2", LaunchSpec::from_image("alpine:3").named("second")),
            ];
        }
        let base_url = serve(upstream.clone()).await;

        let backend = ScriptedBackend::new();
        backend.script("first", Script::default().polls(1));
        backend.script("second", Script::default().polls(1));

        let mut scheduler = SchedulerSettings::with_max_jobs(1);
        scheduler.poll_interval = Duration::from_millis(10);
        let (sink, results) = ChannelSink::new();
        let (agent, handle) = Agent::new(scheduler, backend.adapters());
        agent.with_sink(Arc::new(sink)).spawn();

        let intake = CancellationToken::new();
        let poller = QueuePoller::new(settings(base_url), handle.clone(), results);
        let poller_task = tokio::spawn(poller.run(intake.clone()));

        wait_for(&upstream, |up| up.reports.len() == 2).await;

        intake.cancel();
        handle.shutdown(true).await.unwrap();
        poller_task.await.unwrap().unwrap();

        let up = upstream.lock().unwrap();
        assert_eq!(up.registrations, 3);
        assert!(up.heartbeats >= 1);
        // one slot, so never more than one launch requested per cycle
        assert!(up.limits.iter().all(|limit| *limit == 1));

        let acked: Vec<_> = up.acks.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(acked, ["q-1", "q-2"]);

        for (launch_id, report) in &up.reports {
            let (_, job_id) = up.acks.iter().find(|(id, _)| id == launch_id).unwrap();
            assert_eq!(report.job_id, *job_id);
            assert_eq!(report.stage, Stage::Succeeded);
            assert_eq!(report.agent_id, "agent-1");
            assert!(report.result.as_ref().unwrap().success);
        }
    }

    #[tokio::test]
    async fn test_invalid_launch_is_rejected_upstream() {
        let upstream: Shared = Arc::default();
        upstream.lock().unwrap().pending =
            vec![launch("bad", LaunchSpec::from_image("  ").named("bad"))];
        let base_url = serve(upstream.clone()).await;

        let backend = ScriptedBackend::new();
        let (sink, results) = ChannelSink::new();
        let (agent, handle) = Agent::new(SchedulerSettings::with_max_jobs(2), backend.adapters());
        agent.with_sink(Arc::new(sink)).spawn();

        let intake = CancellationToken::new();
        let poller_task = tokio::spawn(
            QueuePoller::new(settings(base_url), handle.clone(), results).run(intake.clone()),
        );

        wait_for(&upstream, |up| !up.reports.is_empty()).await;

        intake.cancel();
        handle.shutdown(true).await.unwrap();
        poller_task.await.unwrap().unwrap();

        let up = upstream.lock().unwrap();
        assert!(up.acks.is_empty());
        let (id, report) = &up.reports[0];
        assert_eq!(id, "bad");
        assert_eq!(report.stage, Stage::Failed);
        assert!(report.job_id.is_nil());
        assert!(
            report.result.as_ref().unwrap().error_message.as_deref().unwrap().starts_with("invalid launch spec")
        );
        assert_eq!(backend.build_calls("bad"), 0);
    }

    #[tokio::test]
    async fn test_registration_gives_up() {
        let upstream: Shared = Arc::default();
        upstream.lock().unwrap().register_failures = 100;
        let base_url = serve(upstream.clone()).await;

        let backend = ScriptedBackend::new();
        let (_sink, results) = ChannelSink::new();
        let (_agent, handle) = Agent::new(SchedulerSettings::default(), backend.adapters());

        let poller = QueuePoller::new(settings(base_url), handle, results);
        let err = poller.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to register with launch queue"));
        assert_eq!(upstream.lock().unwrap().registrations, 5);
    }

    #[test]
    fn test_settings_require_base_url_and_project() {
        let mut config = AgentConfig::default();
        assert!(QueueSettings::from_config(&config).is_none());

        config.base_url = Some("http://queue.internal".to_string());
        config.project = Some("vision".to_string());
        config.max_jobs = 4;
        let settings = QueueSettings::from_config(&config).unwrap();
        assert_eq!(settings.max_jobs, Some(4));
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
    }
}
