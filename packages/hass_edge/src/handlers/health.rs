use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
///
/// Reports the upstream as it is; never opens a session.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.mux.status().await;
    let session = state.mux.session_state().await;
    let relay = state.mux.metrics().snapshot();
    let metrics = state.metrics.snapshot();

    // Only degraded while clients are being turned away
    let health = if relay.upstream.connect_failures > 0
        && !status.upstream_live
        && metrics.connections.rejected > 0
    {
        "degraded"
    } else {
        "healthy"
    };

    Json(metrics::HealthStatus {
        status: health.to_string(),
        upstream: metrics::UpstreamHealth {
            state: session,
            live: status.upstream_live,
        },
        clients: status.active_client_count as u64,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - server counters plus relay counters
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(metrics::MetricsReport {
        server: state.metrics.snapshot(),
        relay: state.mux.metrics().snapshot(),
    })
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 unless the proxy is shutting down
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let upstream_live = state.mux.status().await.upstream_live;

    if state.mux.is_shutting_down() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "reason": "shutting_down"
            })),
        )
            .into_response()
    } else {
        Json(serde_json::json!({
            "status": "ready",
            "upstream_live": upstream_live
        }))
        .into_response()
    }
}
