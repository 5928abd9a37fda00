//! WebSocket route configuration.
//!
//! # Endpoints
//!
//! - `GET /ws` - browser voice session (start_call / audio / end_call)
//! - `GET /ws/media` - vendor media stream, adopted by the newest active call
//! - `GET /ws/media/{call_id}` - vendor media stream for a specific call
//!
//! All three are WebSocket upgrades and sit behind the connection-limit
//! middleware applied in `main.rs`.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{client_ws, media};
use crate::state::AppState;
use std::sync::Arc;

/// Create the WebSocket router.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(client_ws::client_ws))
        .route("/ws/media", get(media::media_ws))
        .route("/ws/media/{call_id}", get(media::media_ws_with_id))
        .layer(TraceLayer::new_for_http())
}
