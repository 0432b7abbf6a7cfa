//! API Module
//!
//! Local HTTP API of the agent. Handlers translate requests into
//! `AgentHandle` calls; the scheduler itself never sees HTTP types.

pub mod agent;
pub mod error;
pub mod health;
pub mod job;

use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::scheduler::AgentHandle;

/// Shared state of the API handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: AgentHandle,
    /// Cancelled once a shutdown was requested over the API
    pub shutdown: CancellationToken,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/api/jobs", post(job::submit_job).get(job::list_jobs))
        .route("/api/jobs/{id}", get(job::get_job))
        .route("/api/jobs/{id}/cancel", post(job::cancel_job))
        // Agent endpoints
        .route("/api/agent/stats", get(agent::get_stats))
        .route("/api/agent/shutdown", post(agent::shutdown))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
