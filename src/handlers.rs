use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use crate::models::{AutoShareFeedResponse, ErrorResponse};
use crate::state::AppState;

// forward a request to the file manager untouched
pub async fn proxy_request(
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Response {
    let (mut parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    parts.uri = match state.upstream.uri_for(&path_and_query) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!("Cannot build upstream uri for {}: {}", path_and_query, e);
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("Invalid upstream target: {}", e),
                }),
            )
                .into_response();
        }
    };
    // the client derives Host from the upstream uri
    parts.headers.remove(header::HOST);

    tracing::trace!("Proxying {} {}", parts.method, path_and_query);
    match state.upstream.client.request(Request::from_parts(parts, body)).await {
        Ok(resp) => resp.map(Body::new),
        Err(e) => {
            tracing::error!("Upstream request {} failed: {}", path_and_query, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: format!("Upstream request failed: {}", e),
                }),
            )
                .into_response()
        }
    }
}

// recent auto-share outcomes, newest first
pub async fn recent_auto_shares(
    State(state): State<Arc<AppState>>,
) -> Json<AutoShareFeedResponse> {
    let events = state.recent.snapshot();
    let total = events.len();
    Json(AutoShareFeedResponse { events, total })
}

// health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let open_batch = state.tap.batches().snapshot();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "droppr-tap",
        "live_tus_sessions": state.tap.sessions().live_sessions(),
        "pending_uploads": open_batch.map(|b| b.pending).unwrap_or(0),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
