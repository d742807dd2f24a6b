use crate::services::get_metrics;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Health check endpoint for Docker/K8s liveness probes.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.config.service_name,
                    "version": state.config.service_version,
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - trial store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.config.service_name,
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
///
/// Ready means both the trial store and the usage event publisher answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.store.health_check().await {
        tracing::warn!(error = %e, "Readiness check failed - trial store unavailable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if let Err(e) = state.publisher.health_check().await {
        tracing::warn!(error = %e, "Readiness check failed - usage publisher unavailable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// Metrics endpoint for Prometheus scraping.
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
