//! Connection limit middleware for WebSocket routes.
//!
//! Caps the number of concurrently open WebSocket connections (media
//! sockets, browser sessions) so a runaway client cannot exhaust the
//! process. Non-upgrade requests pass through unchecked.
//!
//! The middleware acquires the slot; the WebSocket handler owns releasing
//! it when the socket closes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

/// Rejects WebSocket upgrades once the global connection limit is reached.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    if !state.try_acquire_ws_slot() {
        tracing::warn!(
            connections = state.ws_connection_count(),
            "rejecting connection: websocket limit reached"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Server at capacity. Please try again later.",
        )
            .into_response();
    }

    // The handler releases the slot when its socket task finishes
    next.run(request).await
}
