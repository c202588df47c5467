use axum::{
    Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::AppState;

/// `ANY /api/ha/{*path}` - replay the request against `<upstream>/api/<path>`
pub async fn rest_passthrough_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(rest) = state.rest.as_ref() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "REST passthrough is disabled" })),
        )
            .into_response();
    };

    state.metrics.rest_request();

    let Some(url) = rest.target_url(&path, query.as_deref()) else {
        warn!("Refusing REST passthrough outside /api/: {}", path);
        state.metrics.rest_error();
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "Path leaves the Home Assistant API" })),
        )
            .into_response();
    };

    let upstream = match rest
        .forward(method, url, headers.get(CONTENT_TYPE), body)
        .await
    {
        Ok(upstream) => upstream,
        Err(e) => return bad_gateway(&state, &path, e),
    };

    let status = upstream.status();
    let content_type = upstream.headers().get(CONTENT_TYPE).cloned();
    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => return bad_gateway(&state, &path, e),
    };

    let mut response = (status, body).into_response();
    match content_type {
        Some(content_type) => {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        None => {
            response.headers_mut().remove(CONTENT_TYPE);
        }
    }
    response
}

fn bad_gateway(state: &AppState, path: &str, e: reqwest::Error) -> Response {
    warn!("REST passthrough to /api/{} failed: {}", path, e);
    state.metrics.rest_error();
    (
        StatusCode::BAD_GATEWAY,
        Json(serde_json::json!({
            "error": "Failed to reach Home Assistant",
            "detail": e.to_string(),
        })),
    )
        .into_response()
}
