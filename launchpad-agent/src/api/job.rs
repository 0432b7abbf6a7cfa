//! Job API Handlers
//!
//! HTTP endpoints for submitting, inspecting and cancelling launches.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use launchpad_core::domain::job::JobRecord;
use launchpad_core::dto::job::{CancelAccepted, JobSummary, SubmitLaunch, SubmitResponse};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /api/jobs
/// Queue a launch
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitLaunch>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    tracing::info!("Submitting launch: {}", req.spec.display_name());

    let id = state.agent.submit(req.spec).await?;

    Ok((StatusCode::CREATED, Json(SubmitResponse { id })))
}

/// GET /api/jobs/{id}
/// Get the full record of a job
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobRecord>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(state.agent.status(id).await?))
}

/// GET /api/jobs
/// List retained jobs in submission order
pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobSummary>>> {
    tracing::debug!("Listing jobs");

    Ok(Json(state.agent.list().await?))
}

/// POST /api/jobs/{id}/cancel
/// Request cancellation of a job
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CancelAccepted>)> {
    tracing::info!("Cancelling job: {}", id);

    let accepted = state.agent.cancel(id).await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
