//! Health Check API Handler

use axum::{http::StatusCode, response::IntoResponse};

/// GET /health
/// Liveness of the HTTP server
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
