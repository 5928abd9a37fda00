//! REST API route configuration.

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, events, webhook};
use crate::state::AppState;
use std::sync::Arc;

/// Create the `/api` router.
///
/// The webhook targets (`/calls/inbound`, `/calls/events`) live here too:
/// the telephony vendor posts to them, every other route serves the UI.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/calls/outbound", post(api::outbound_call))
        .route("/calls", get(api::list_calls))
        .route("/calls/{call_id}", get(api::get_call))
        .route("/calls/{call_id}/hangup", post(api::hangup_call))
        .route("/calls/{call_id}/recording", get(api::get_recording))
        .route("/calls/inbound", post(webhook::inbound_call))
        .route("/calls/events", post(webhook::connection_events))
        .route("/events/stream", get(events::event_stream))
        .route(
            "/inbound-agent",
            get(api::get_inbound_agent).post(api::set_inbound_agent),
        )
        .route("/config", get(api::get_config))
        .layer(TraceLayer::new_for_http())
}
