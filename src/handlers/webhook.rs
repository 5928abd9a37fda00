//! Telephony webhook handlers.
//!
//! These endpoints are called by the telephony vendor, which retries on
//! non-2xx responses. A retry of an incoming-call notification would create
//! a duplicate call attempt, so internal failures are logged and surfaced
//! as terminal call state, never as an HTTP error.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::state::AppState;
use crate::telephony::events::{InboundNotification, parse_inbound, parse_connection_events};

/// `POST /api/calls/inbound`: incoming-call notifications.
///
/// Handles the subscription validation handshake inline; real offers are
/// answered through the orchestrator. Always returns 200.
pub async fn inbound_call(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    match parse_inbound(&body) {
        Ok(InboundNotification::Validation { code }) => {
            info!("webhook subscription validated");
            Json(json!({ "validationResponse": code }))
        }
        Ok(InboundNotification::IncomingCall {
            context,
            from_number,
        }) => {
            match state
                .orchestrator
                .accept_inbound_call(&context, from_number)
                .await
            {
                Ok(call_id) => Json(json!({ "success": true, "call_id": call_id })),
                Err(e) => {
                    error!("failed to accept inbound call: {e}");
                    Json(json!({ "success": false, "error": e.code() }))
                }
            }
        }
        Err(e) => {
            error!("unparseable inbound webhook: {e}");
            Json(json!({ "success": false, "error": e.code() }))
        }
    }
}

/// `POST /api/calls/events`: mid-call connection events. Always 200.
pub async fn connection_events(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    for event in parse_connection_events(&body) {
        state.orchestrator.handle_connection_event(event).await;
    }
    Json(json!({ "status": "ok" }))
}
