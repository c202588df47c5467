use axum::{
    Json,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{info, warn};

use crate::AppState;
use crate::websocket_proxy;

/// Client WebSocket endpoint.
///
/// The client is registered with the multiplexer before the upgrade so a
/// failed upstream connect is reported as a plain HTTP error and nothing is
/// left behind.
pub async fn websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let session = match state.mux.accept_client().await {
        Ok(session) => session,
        Err(e) => {
            warn!("Refusing websocket client: {}", e);
            state.metrics.connection_rejected();
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Failed to connect to Home Assistant",
                    "detail": e.to_string(),
                })),
            )
                .into_response();
        }
    };

    let client_id = session.id();
    let mux = state.mux.clone();
    let failed_mux = state.mux.clone();
    let metrics = state.metrics.clone();

    ws.on_failed_upgrade(move |e| {
        info!(client = %client_id, "WebSocket upgrade failed: {}", e);
        tokio::spawn(async move {
            failed_mux.remove_client(client_id).await;
        });
    })
    .on_upgrade(move |socket| websocket_proxy::handle_client(socket, mux, session, metrics))
}

/// Active client count and upstream liveness. Never opens a session.
pub async fn websocket_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.mux.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status_reports_idle_proxy_without_connecting() {
        let (state, upstream) = crate::test_helpers::test_app_state().await;
        let app = Router::new()
            .route("/status", get(websocket_status_handler))
            .with_state(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"activeClientCount": 0, "upstreamLive": false})
        );
        assert_eq!(upstream.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_status_reflects_registered_clients() {
        let (state, _upstream) = crate::test_helpers::test_app_state().await;
        let _a = state.mux.accept_client().await.unwrap();
        let _b = state.mux.accept_client().await.unwrap();

        let app = Router::new()
            .route("/status", get(websocket_status_handler))
            .with_state(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["activeClientCount"], 2);
        assert_eq!(json["upstreamLive"], true);
    }
}
