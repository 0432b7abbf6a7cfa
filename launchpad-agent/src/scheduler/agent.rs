//! Agent loop
//!
//! A single task owns every job record, the FIFO queue and the slot pool.
//! It wakes on commands from `AgentHandle`s and on events from stage tasks,
//! applies the result to the affected record, then admits queued jobs while
//! slots are free. Adapter calls never run on this task.

use chrono::Utc;
use launchpad_core::domain::job::{JobRecord, Stage, TransitionError};
use launchpad_core::domain::launch::LaunchSpec;
use launchpad_core::domain::run::{RunHandle, RunStatus};
use launchpad_core::dto::agent::AgentStats;
use launchpad_core::dto::job::{CancelAccepted, JobSummary};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ops::{self, CancelOutcome, Dispatch, Event, OpOutcome, StageOp, StageOutput};
use super::settings::SchedulerSettings;
use super::sink::ResultSink;
use super::slots::SlotPool;
use crate::adapter::AdapterSet;
use crate::config::SlotRelease;
use crate::error::{AdapterError, AgentError};

const COMMAND_BUFFER: usize = 256;

enum Command {
    Submit {
        spec: LaunchSpec,
        reply: oneshot::Sender<Result<Uuid, AgentError>>,
    },
    Status {
        id: Uuid,
        reply: oneshot::Sender<Result<JobRecord, AgentError>>,
    },
    List {
        reply: oneshot::Sender<Vec<JobSummary>>,
    },
    Stats {
        reply: oneshot::Sender<AgentStats>,
    },
    Cancel {
        id: Uuid,
        reply: oneshot::Sender<Result<CancelAccepted, AgentError>>,
    },
    Shutdown {
        drain: bool,
        reply: oneshot::Sender<()>,
    },
}

/// Loop-side state of an admitted job
struct ActiveJob {
    spec: Arc<LaunchSpec>,
    token: CancellationToken,
    /// Sequence number of the in-flight stage operation
    seq: u64,
    task: Option<JoinHandle<()>>,
    cancel_note: String,
    cancel_deadline: Option<Instant>,
    cancel_task: Option<JoinHandle<()>>,
    run_deadline: Option<Instant>,
    poll_failures: u32,
}

impl ActiveJob {
    fn new(spec: Arc<LaunchSpec>) -> Self {
        Self {
            spec,
            token: CancellationToken::new(),
            seq: 0,
            task: None,
            cancel_note: String::new(),
            cancel_deadline: None,
            cancel_task: None,
            run_deadline: None,
            poll_failures: 0,
        }
    }
}

/// What the loop does after applying a stage result
enum Next {
    Dispatch(StageOp),
    Running(RunHandle),
    StillRunning,
    Finished,
}

fn apply_output(
    record: &mut JobRecord,
    output: StageOutput,
) -> Result<Next, TransitionError> {
    let now = Utc::now();
    match output {
        StageOutput::Built(image) => {
            record.set_image(image.clone())?;
            record.advance(Stage::Pushing, now, None)?;
            Ok(Next::Dispatch(StageOp::Push(image)))
        }
        StageOutput::Published(published) => {
            record.set_published(published.clone())?;
            record.advance(Stage::Launching, now, None)?;
            Ok(Next::Dispatch(StageOp::Launch(published)))
        }
        StageOutput::Launched(handle) => {
            record.set_handle(handle.clone())?;
            record.advance(Stage::Running, now, Some(format!("launched as {}", handle)))?;
            Ok(Next::Running(handle))
        }
        StageOutput::Polled(RunStatus::Running) => Ok(Next::StillRunning),
        StageOutput::Polled(RunStatus::Succeeded) => {
            record.succeed(now)?;
            Ok(Next::Finished)
        }
        StageOutput::Polled(RunStatus::Failed(reason)) => {
            record.fail(now, format!("run failed: {}", reason))?;
            Ok(Next::Finished)
        }
    }
}

/// Operation that repeats the record's current stage
fn retry_op(record: &JobRecord) -> Option<StageOp> {
    match record.stage {
        Stage::Building => Some(StageOp::Build),
        Stage::Pushing => record.image.clone().map(StageOp::Push),
        Stage::Launching => record.published.clone().map(StageOp::Launch),
        Stage::Running => record.handle.clone().map(StageOp::Poll),
        _ => None,
    }
}

fn describe_capacity(capacity: Option<usize>) -> String {
    capacity.map_or_else(|| "unbounded".to_string(), |c| c.to_string())
}

/// The scheduling loop
pub struct Agent {
    settings: SchedulerSettings,
    adapters: AdapterSet,
    records: HashMap<Uuid, JobRecord>,
    /// Submission order, for listing
    order: Vec<Uuid>,
    queue: VecDeque<Uuid>,
    /// Terminal jobs, oldest first, for history pruning
    finished: VecDeque<Uuid>,
    active: HashMap<Uuid, ActiveJob>,
    slots: SlotPool,
    sinks: Vec<Arc<dyn ResultSink>>,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Agent {
    /// Creates the loop and the handle used to drive it
    pub fn new(settings: SchedulerSettings, adapters: AdapterSet) -> (Self, AgentHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events) = mpsc::unbounded_channel();

        let agent = Self {
            slots: SlotPool::new(settings.capacity),
            settings,
            adapters,
            records: HashMap::new(),
            order: Vec::new(),
            queue: VecDeque::new(),
            finished: VecDeque::new(),
            active: HashMap::new(),
            sinks: Vec::new(),
            shutting_down: false,
            shutdown_waiters: Vec::new(),
            commands,
            events_tx,
            events,
        };

        (
            agent,
            AgentHandle {
                commands: commands_tx,
            },
        )
    }

    /// Adds a sink that receives every terminal record
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until every handle is dropped and no job is active
    pub async fn run(mut self) {
        info!(
            "Agent loop started (capacity: {}, slot release: {:?})",
            describe_capacity(self.slots.capacity()),
            self.settings.slot_release
        );

        let mut commands_open = true;

        loop {
            tokio::select! {
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => commands_open = false,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }

            self.admit();
            self.notify_shutdown_waiters();

            if !commands_open && self.active.is_empty() {
                break;
            }
        }

        info!("Agent loop stopped");
    }

    // ===== Commands =====

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { spec, reply } => {
                let _ = reply.send(self.submit(spec));
            }
            Command::Status { id, reply } => {
                let record = self.records.get(&id).cloned().ok_or(AgentError::NotFound(id));
                let _ = reply.send(record);
            }
            Command::List { reply } => {
                let summaries = self
                    .order
                    .iter()
                    .filter_map(|id| self.records.get(id))
                    .map(JobSummary::from)
                    .collect();
                let _ = reply.send(summaries);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::Shutdown { drain, reply } => {
                self.begin_shutdown(drain);
                self.shutdown_waiters.push(reply);
            }
        }
    }

    fn submit(&mut self, spec: LaunchSpec) -> Result<Uuid, AgentError> {
        if self.shutting_down {
            return Err(AgentError::ShuttingDown);
        }
        spec.validate().map_err(AgentError::InvalidSpec)?;

        let must_wait = !self.queue.is_empty() || !self.slots.has_free();
        if let (true, Some(limit)) = (must_wait, self.settings.max_queue) {
            if self.queue.len() >= limit {
                return Err(AgentError::Capacity { limit });
            }
        }

        let id = Uuid::new_v4();
        info!("Submitted job {} ({})", id, spec.display_name());

        self.records.insert(id, JobRecord::new(id, spec, Utc::now()));
        self.order.push(id);
        self.queue.push_back(id);
        Ok(id)
    }

    fn stats(&self) -> AgentStats {
        AgentStats {
            active: self.active.len(),
            queued: self.queue.len(),
            capacity: self.slots.capacity(),
            free_slots: self.slots.free(),
            shutting_down: self.shutting_down,
        }
    }

    fn cancel(&mut self, id: Uuid) -> Result<CancelAccepted, AgentError> {
        let record = self.records.get(&id).ok_or(AgentError::NotFound(id))?;
        if record.is_terminal() {
            return Err(AgentError::AlreadyTerminal {
                id,
                stage: record.stage,
            });
        }

        if record.stage == Stage::Queued {
            self.queue.retain(|queued| *queued != id);
            self.cancel_queued(id, "cancelled before admission");
            return Ok(CancelAccepted {
                id,
                stage: Stage::Cancelled,
            });
        }

        let stage = record.stage;
        self.request_cancel(id, "cancelled by request");
        Ok(CancelAccepted { id, stage })
    }

    fn begin_shutdown(&mut self, drain: bool) {
        if !self.shutting_down {
            info!(
                "Shutting down (drain: {}, active: {}, queued: {})",
                drain,
                self.active.len(),
                self.queue.len()
            );
        }
        self.shutting_down = true;

        for id in std::mem::take(&mut self.queue) {
            self.cancel_queued(id, "agent shut down before admission");
        }

        if !drain {
            let active: Vec<Uuid> = self.active.keys().copied().collect();
            for id in active {
                self.request_cancel(id, "cancelled by agent shutdown");
            }
        }
    }

    fn notify_shutdown_waiters(&mut self) {
        if self.shutting_down && self.active.is_empty() && !self.shutdown_waiters.is_empty() {
            info!("All jobs settled, shutdown complete");
            for waiter in self.shutdown_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    // ===== Admission =====

    fn admit(&mut self) {
        while !self.shutting_down && self.slots.has_free() {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            if !self.slots.acquire(id) {
                error!("No slot granted to job {}, leaving it queued", id);
                self.queue.push_front(id);
                break;
            }
            let Some(record) = self.records.get_mut(&id) else {
                self.slots.release(id);
                continue;
            };

            if let Err(e) = record.advance(Stage::Building, Utc::now(), None) {
                error!("Cannot admit job {}: {}", id, e);
                self.slots.release(id);
                continue;
            }
            let spec = Arc::new(record.spec.clone());

            info!(
                "Admitted job {} ({}); {} slot(s) in use, {} queued",
                id,
                spec.display_name(),
                self.slots.in_use(),
                self.queue.len()
            );

            self.active.insert(id, ActiveJob::new(spec));
            self.dispatch(id, StageOp::Build, Duration::ZERO);
        }
    }

    fn dispatch(&mut self, job_id: Uuid, op: StageOp, delay: Duration) {
        let Some(record) = self.records.get(&job_id) else {
            return;
        };
        let limit = self.settings.timeouts.for_stage(record.stage);
        let Some(active) = self.active.get_mut(&job_id) else {
            return;
        };

        active.seq += 1;
        debug!(
            "Dispatching {:?} for job {} (stage {}, attempt {}, delay {:?})",
            op,
            job_id,
            record.stage,
            record.attempt(),
            delay
        );

        let dispatch = Dispatch {
            job_id,
            seq: active.seq,
            spec: Arc::clone(&active.spec),
            adapters: self.adapters.clone(),
            delay,
            limit,
            token: active.token.clone(),
            events: self.events_tx.clone(),
        };
        active.task = Some(ops::spawn_stage(dispatch, op));
    }

    // ===== Stage results =====

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::StageDone {
                job_id,
                seq,
                outcome,
            } => self.on_stage_done(job_id, seq, outcome),
            Event::CancelDone { job_id, outcome } => self.on_cancel_done(job_id, outcome),
        }
    }

    fn on_stage_done(&mut self, job_id: Uuid, seq: u64, outcome: OpOutcome) {
        let Some(active) = self.active.get_mut(&job_id) else {
            debug!("Ignoring result for settled job {}", job_id);
            return;
        };
        if active.seq != seq {
            debug!("Ignoring stale result {} for job {}", seq, job_id);
            return;
        }
        active.task = None;

        let cancel_requested = self
            .records
            .get(&job_id)
            .is_some_and(|record| record.cancel_requested);
        if cancel_requested {
            self.continue_cancel(job_id, outcome);
            return;
        }

        match outcome {
            OpOutcome::Finished(Ok(output)) => self.on_stage_output(job_id, output),
            OpOutcome::Finished(Err(err)) => self.on_stage_error(job_id, err),
            OpOutcome::Interrupted => {
                warn!("Job {} operation interrupted without a cancel request", job_id);
            }
        }
    }

    fn on_stage_output(&mut self, job_id: Uuid, output: StageOutput) {
        let Some(record) = self.records.get_mut(&job_id) else {
            return;
        };

        match apply_output(record, output) {
            Ok(Next::Dispatch(op)) => {
                info!("Job {} entered {}", job_id, record.stage);
                self.dispatch(job_id, op, Duration::ZERO);
            }
            Ok(Next::Running(handle)) => {
                info!("Job {} running as {}", job_id, handle);
                if self.settings.slot_release == SlotRelease::OnRunning {
                    self.slots.release(job_id);
                }
                if let Some(active) = self.active.get_mut(&job_id) {
                    active.run_deadline = self.settings.timeouts.run.map(|limit| Instant::now() + limit);
                }
                self.dispatch(job_id, StageOp::Poll(handle), self.settings.poll_interval);
            }
            Ok(Next::StillRunning) => self.keep_polling(job_id),
            Ok(Next::Finished) => self.finalize(job_id),
            Err(e) => {
                error!("Job {} rejected stage result: {}", job_id, e);
                self.fail_job(job_id, format!("internal error: {}", e));
            }
        }
    }

    fn keep_polling(&mut self, job_id: Uuid) {
        let handle = self.records.get(&job_id).and_then(|r| r.handle.clone());
        let Some(active) = self.active.get_mut(&job_id) else {
            return;
        };
        active.poll_failures = 0;

        let Some(handle) = handle else {
            self.fail_job(job_id, "running job has no run handle".to_string());
            return;
        };

        let expired = active
            .run_deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            let limit = self.settings.timeouts.run.unwrap_or_default();
            warn!("Job {} exceeded its run time of {}s, stopping {}", job_id, limit.as_secs(), handle);
            ops::stop_detached(handle, self.adapters.clone(), self.settings.cancel_grace);
            self.fail_job(
                job_id,
                format!("run exceeded maximum duration of {}s", limit.as_secs()),
            );
            return;
        }

        self.dispatch(job_id, StageOp::Poll(handle), self.settings.poll_interval);
    }

    fn on_stage_error(&mut self, job_id: Uuid, err: AdapterError) {
        let (Some(record), Some(active)) =
            (self.records.get_mut(&job_id), self.active.get_mut(&job_id))
        else {
            return;
        };

        let stage = record.stage;
        let policy = self.settings.retry.for_stage(stage);
        let attempts = if stage == Stage::Running {
            active.poll_failures += 1;
            active.poll_failures
        } else {
            record.attempt()
        };

        if err.is_transient() && policy.should_retry(attempts) {
            let delay = policy.backoff(attempts);
            warn!(
                "Job {} {} attempt {}/{} failed: {}; retrying in {:?}",
                job_id, stage, attempts, policy.max_attempts, err, delay
            );

            let op = match record.record_retry(Utc::now(), err.to_string()) {
                Ok(_) => retry_op(record),
                Err(e) => {
                    error!("Job {} cannot retry: {}", job_id, e);
                    None
                }
            };
            match op {
                Some(op) => self.dispatch(job_id, op, delay),
                None => self.fail_job(job_id, err.to_string()),
            }
            return;
        }

        let reason = if err.is_transient() {
            format!("{} (gave up after {} attempts)", err, attempts)
        } else {
            err.to_string()
        };
        self.fail_job(job_id, reason);
    }

    // ===== Cancellation =====

    fn cancel_queued(&mut self, id: Uuid, note: &str) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        record.cancel_requested = true;
        match record.cancel(Utc::now(), note, false) {
            Ok(()) => {
                info!("Job {} cancelled while queued", id);
                self.finalize(id);
            }
            Err(e) => error!("Cannot cancel queued job {}: {}", id, e),
        }
    }

    /// Interrupts the in-flight operation of an active job
    fn request_cancel(&mut self, id: Uuid, note: &str) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if record.cancel_requested {
            return;
        }
        let Some(active) = self.active.get_mut(&id) else {
            return;
        };

        record.cancel_requested = true;
        active.cancel_note = note.to_string();
        active.cancel_deadline = Some(Instant::now() + self.settings.cancel_grace);

        info!("Cancelling job {} in stage {}", id, record.stage);
        active.token.cancel();
    }

    /// Continues a cancellation once the in-flight stage operation has stopped
    fn continue_cancel(&mut self, job_id: Uuid, outcome: OpOutcome) {
        // A launch that finished despite the request still started a workload
        if let OpOutcome::Finished(Ok(StageOutput::Launched(handle))) = outcome {
            if let Some(record) = self.records.get_mut(&job_id) {
                if let Err(e) = record.set_handle(handle) {
                    warn!("Job {} dropped run handle: {}", job_id, e);
                }
            }
        }

        let Some(record) = self.records.get(&job_id) else {
            return;
        };
        let stage = record.stage;
        let handle = record.handle.clone();
        let Some(active) = self.active.get_mut(&job_id) else {
            return;
        };
        let note = active.cancel_note.clone();

        match handle {
            Some(handle) => {
                let remaining = active
                    .cancel_deadline
                    .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(self.settings.cancel_grace);
                debug!("Job {} asking backend to stop {}", job_id, handle);
                active.cancel_task = Some(ops::spawn_cancel(
                    job_id,
                    handle,
                    self.adapters.clone(),
                    remaining,
                    self.events_tx.clone(),
                ));
            }
            // The launch request may have reached the backend before it was dropped
            None if stage == Stage::Launching => self.cancel_job(
                job_id,
                format!("{}; launch was interrupted and may have started remotely", note),
                true,
            ),
            None => self.cancel_job(job_id, note, false),
        }
    }

    fn on_cancel_done(&mut self, job_id: Uuid, outcome: CancelOutcome) {
        let Some(active) = self.active.get(&job_id) else {
            return;
        };
        let note = active.cancel_note.clone();

        match outcome {
            CancelOutcome::Acknowledged => self.cancel_job(job_id, note, false),
            CancelOutcome::Failed(err) => {
                warn!("Job {} backend cancel failed: {}", job_id, err);
                self.cancel_job(
                    job_id,
                    format!(
                        "{}; cancel failed ({}), workload may still be running remotely",
                        note, err
                    ),
                    true,
                );
            }
            CancelOutcome::TimedOut(limit) => {
                warn!(
                    "Job {} backend did not acknowledge cancellation within {}s, releasing slot",
                    job_id,
                    limit.as_secs()
                );
                self.cancel_job(
                    job_id,
                    format!(
                        "{}; not acknowledged within {}s, workload may still be running remotely",
                        note,
                        limit.as_secs()
                    ),
                    true,
                );
            }
        }
    }

    // ===== Terminal states =====

    fn cancel_job(&mut self, job_id: Uuid, note: String, remote_cleanup_required: bool) {
        let Some(record) = self.records.get_mut(&job_id) else {
            return;
        };
        match record.cancel(Utc::now(), note, remote_cleanup_required) {
            Ok(()) => self.finalize(job_id),
            Err(e) => error!("Cannot cancel job {}: {}", job_id, e),
        }
    }

    fn fail_job(&mut self, job_id: Uuid, reason: String) {
        let Some(record) = self.records.get_mut(&job_id) else {
            return;
        };
        match record.fail(Utc::now(), reason) {
            Ok(()) => self.finalize(job_id),
            Err(e) => error!("Cannot fail job {}: {}", job_id, e),
        }
    }

    /// Releases everything a terminal job held and delivers its result
    fn finalize(&mut self, job_id: Uuid) {
        if let Some(active) = self.active.remove(&job_id) {
            active.token.cancel();
            if let Some(task) = active.task {
                task.abort();
            }
            if let Some(task) = active.cancel_task {
                task.abort();
            }
        }
        self.slots.release(job_id);

        let Some(record) = self.records.get(&job_id) else {
            return;
        };
        match &record.result {
            Some(result) if result.success => {
                info!("Job {} succeeded", job_id);
            }
            Some(result) => warn!(
                "Job {} ended {} in {}: {}",
                job_id,
                record.stage,
                result.stage,
                result.error_message.as_deref().unwrap_or("no diagnostic")
            ),
            None => error!("Job {} finished without a result", job_id),
        }

        for sink in &self.sinks {
            sink.deliver(record);
        }

        self.finished.push_back(job_id);
        self.prune_history();
    }

    fn prune_history(&mut self) {
        while self.finished.len() > self.settings.history_limit {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            self.records.remove(&oldest);
            self.order.retain(|id| *id != oldest);
        }
    }
}

/// Cloneable handle to a running agent loop
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<Command>,
}

impl AgentHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, AgentError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| AgentError::Stopped)?;
        response.await.map_err(|_| AgentError::Stopped)
    }

    /// Queues a launch and returns its job id
    pub async fn submit(&self, spec: LaunchSpec) -> Result<Uuid, AgentError> {
        self.request(|reply| Command::Submit { spec, reply }).await?
    }

    /// Snapshot of a job record
    pub async fn status(&self, id: Uuid) -> Result<JobRecord, AgentError> {
        self.request(|reply| Command::Status { id, reply }).await?
    }

    /// Summaries of every retained job, in submission order
    pub async fn list(&self) -> Result<Vec<JobSummary>, AgentError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn stats(&self) -> Result<AgentStats, AgentError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Requests cancellation; the job settles asynchronously unless it was queued
    pub async fn cancel(&self, id: Uuid) -> Result<CancelAccepted, AgentError> {
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    /// Stops admissions and waits until no job is active
    ///
    /// Queued jobs are cancelled. With `drain` active jobs run to completion,
    /// otherwise they are cancelled too.
    pub async fn shutdown(&self, drain: bool) -> Result<(), AgentError> {
        self.request(|reply| Command::Shutdown { drain, reply }).await
    }
}
