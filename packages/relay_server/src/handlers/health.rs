use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;

use crate::AppState;
use crate::metrics::HealthStatus;

/// Root endpoint - service banner with pointers.
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Agent Relay",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "health": "/health",
        "stats": "/v1/ws/stats",
    }))
}

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();

    let status = if snapshot.errors.websocket == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connections: snapshot.connections.active,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
