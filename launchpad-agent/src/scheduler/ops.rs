//! Stage operations
//!
//! Each adapter call runs in its own task, off the agent loop. The task
//! waits out any retry delay, bounds the call by the stage timeout and
//! reports back through the event channel. Cancelling the job's token drops
//! the adapter future and reports the operation as interrupted.

use launchpad_core::domain::launch::LaunchSpec;
use launchpad_core::domain::run::{ImageRef, PublishedRef, RunHandle, RunStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapter::AdapterSet;
use crate::error::AdapterError;

/// Adapter call that advances a job's pipeline
#[derive(Debug, Clone)]
pub enum StageOp {
    Build,
    Push(ImageRef),
    Launch(PublishedRef),
    Poll(RunHandle),
}

impl StageOp {
    fn label(&self) -> &'static str {
        match self {
            StageOp::Build => "build",
            StageOp::Push(_) => "push",
            StageOp::Launch(_) => "launch",
            StageOp::Poll(_) => "status poll",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StageOutput {
    Built(ImageRef),
    Published(PublishedRef),
    Launched(RunHandle),
    Polled(RunStatus),
}

#[derive(Debug)]
pub enum OpOutcome {
    Finished(Result<StageOutput, AdapterError>),
    /// The job's token was cancelled before the call returned
    Interrupted,
}

/// How a remote cancellation ended
#[derive(Debug)]
pub enum CancelOutcome {
    Acknowledged,
    Failed(AdapterError),
    TimedOut(Duration),
}

/// Messages from operation tasks to the agent loop
#[derive(Debug)]
pub enum Event {
    StageDone {
        job_id: Uuid,
        seq: u64,
        outcome: OpOutcome,
    },
    CancelDone {
        job_id: Uuid,
        outcome: CancelOutcome,
    },
}

/// Everything a stage task needs, cloned out of the loop
pub struct Dispatch {
    pub job_id: Uuid,
    pub seq: u64,
    pub spec: Arc<LaunchSpec>,
    pub adapters: AdapterSet,
    pub delay: Duration,
    pub limit: Duration,
    pub token: CancellationToken,
    pub events: mpsc::UnboundedSender<Event>,
}

async fn run_op(
    adapters: &AdapterSet,
    job_id: Uuid,
    spec: &LaunchSpec,
    op: StageOp,
) -> Result<StageOutput, AdapterError> {
    match op {
        StageOp::Build => {
            adapters.check_spec(spec)?;
            adapters.builder.build(job_id, spec).await.map(StageOutput::Built)
        }
        StageOp::Push(image) => adapters
            .publisher
            .push(job_id, &image, &adapters.target)
            .await
            .map(StageOutput::Published),
        StageOp::Launch(published) => adapters
            .runner
            .launch(job_id, &published, spec)
            .await
            .map(StageOutput::Launched),
        StageOp::Poll(handle) => adapters.runner.poll(&handle).await.map(StageOutput::Polled),
    }
}

/// Adapter call running in its own task, aborted when dropped
struct AdapterCall(JoinHandle<Result<StageOutput, AdapterError>>);

impl Drop for AdapterCall {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns `op` for a job
///
/// The adapter call runs in a nested task so a panicking adapter fails the
/// stage instead of taking the report down with it.
pub fn spawn_stage(dispatch: Dispatch, op: StageOp) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Dispatch {
            job_id,
            seq,
            spec,
            adapters,
            delay,
            limit,
            token,
            events,
        } = dispatch;

        let label = op.label();
        let work = async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut call = AdapterCall(tokio::spawn(async move {
                run_op(&adapters, job_id, &spec, op).await
            }));
            match tokio::time::timeout(limit, &mut call.0).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) if e.is_panic() => {
                    error!("Job {} {} panicked", job_id, label);
                    Err(AdapterError::terminal(format!("{} panicked", label)))
                }
                Ok(Err(e)) => Err(AdapterError::transient(format!("{} aborted: {}", label, e))),
                Err(_) => Err(AdapterError::transient(format!(
                    "{} timed out after {}s",
                    label,
                    limit.as_secs()
                ))),
            }
        };

        let outcome = tokio::select! {
            _ = token.cancelled() => OpOutcome::Interrupted,
            result = work => OpOutcome::Finished(result),
        };

        let _ = events.send(Event::StageDone {
            job_id,
            seq,
            outcome,
        });
    })
}

/// Spawns a remote cancellation bounded by `limit`
pub fn spawn_cancel(
    job_id: Uuid,
    handle: RunHandle,
    adapters: AdapterSet,
    limit: Duration,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match tokio::time::timeout(limit, adapters.runner.cancel(&handle)).await {
            Ok(Ok(())) => CancelOutcome::Acknowledged,
            Ok(Err(e)) => CancelOutcome::Failed(e),
            Err(_) => CancelOutcome::TimedOut(limit),
        };
        let _ = events.send(Event::CancelDone { job_id, outcome });
    })
}

/// Stops a workload the job no longer tracks, logging the outcome
pub fn stop_detached(handle: RunHandle, adapters: AdapterSet, limit: Duration) {
    tokio::spawn(async move {
        match tokio::time::timeout(limit, adapters.runner.cancel(&handle)).await {
            Ok(Ok(())) => info!("Stopped workload {}", handle),
            Ok(Err(e)) => warn!("Failed to stop workload {}: {}", handle, e),
            Err(_) => warn!(
                "Workload {} did not stop within {}s and may still be running",
                handle,
                limit.as_secs()
            ),
        }
    });
}
