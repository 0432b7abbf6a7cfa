//! Agent API Handlers

use axum::{Json, extract::State, http::StatusCode};
use launchpad_core::dto::agent::{AgentStats, ShutdownRequest};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// GET /api/agent/stats
/// Current capacity of the agent
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<AgentStats>> {
    Ok(Json(state.agent.stats().await?))
}

/// POST /api/agent/shutdown
/// Stop admitting launches and shut the agent down
///
/// Jobs settle in the background; the server stops after the last one.
pub async fn shutdown(
    State(state): State<AppState>,
    body: Option<Json<ShutdownRequest>>,
) -> ApiResult<StatusCode> {
    let ShutdownRequest { drain } = body.map(|Json(req)| req).unwrap_or_default();
    tracing::info!("Shutdown requested over the API (drain: {})", drain);

    let agent = state.agent.clone();
    let signal = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = agent.shutdown(drain).await {
            tracing::warn!("Shutdown did not complete cleanly: {}", e);
        }
        signal.cancel();
    });

    Ok(StatusCode::ACCEPTED)
}
