//! Health Routes
//!
//! Health check endpoints for monitoring and load balancer probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (room for another connection)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 503 once the relay has reached its connection limit.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    if has_capacity(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health
///
/// Full health status with session details.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let hub_config = state.hub.config();
    let connections = state.ws_connection_count().await;
    let history_len = state.hub.history_len().await;
    let history_dropped = state.hub.history_dropped().await;

    let status = if connections < hub_config.max_connections {
        "healthy"
    } else {
        "full"
    };

    Json(HealthResponse {
        status: status.to_string(),
        profile: hub_config.profile.to_string(),
        connections,
        max_connections: hub_config.max_connections,
        history_len,
        history_dropped,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn has_capacity(state: &AppState) -> bool {
    state.ws_connection_count().await < state.hub.config().max_connections
}
