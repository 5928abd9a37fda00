//! REST API handlers for call control and inspection.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use object_store::{ObjectStore, path::Path as ObjectPath};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::registry::CallSession;
use crate::state::AppState;

/// Request body for `POST /api/calls/outbound`.
#[derive(Debug, Deserialize)]
pub struct OutboundCallRequest {
    pub target_phone_number: String,
    /// Agenda text steering the agent for this call; server default applies
    /// when omitted
    #[serde(default)]
    pub agenda: Option<String>,
}

/// Response for call placement and hangup.
#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub success: bool,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `POST /api/calls/outbound`
pub async fn outbound_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OutboundCallRequest>,
) -> AppResult<Json<CallResponse>> {
    let call_id = state
        .orchestrator
        .start_outbound_call(&request.target_phone_number, request.agenda)
        .await?;
    Ok(Json(CallResponse {
        success: true,
        call_id,
        message: None,
    }))
}

/// `POST /api/calls/{call_id}/hangup`
pub async fn hangup_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallResponse>> {
    state.orchestrator.hangup(&call_id).await?;
    Ok(Json(CallResponse {
        success: true,
        call_id,
        message: Some("Call ended".to_string()),
    }))
}

/// `GET /api/calls`: current registry contents, creation order.
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<Value> {
    let calls: Vec<CallSession> = state.orchestrator.registry().list_all();
    Json(json!({ "calls": calls }))
}

/// `GET /api/calls/{call_id}`
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<CallSession>> {
    state
        .orchestrator
        .registry()
        .get(&call_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("call {call_id}")))
}

/// Request body for `POST /api/inbound-agent`.
#[derive(Debug, Deserialize)]
pub struct InboundAgentRequest {
    pub instructions: String,
}

/// `GET /api/inbound-agent`: agenda future inbound calls will use.
pub async fn get_inbound_agent(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "instructions": state.orchestrator.inbound_agenda().as_str() }))
}

/// `POST /api/inbound-agent`: replace the inbound agenda. Calls already in
/// progress keep the agenda they started with.
pub async fn set_inbound_agent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InboundAgentRequest>,
) -> AppResult<Json<Value>> {
    if request.instructions.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "instructions must not be empty".to_string(),
        ));
    }
    state
        .orchestrator
        .set_inbound_agenda(request.instructions.clone());
    Ok(Json(json!({
        "success": true,
        "instructions": request.instructions,
    })))
}

/// `GET /api/config`: non-secret configuration the UI needs.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "inbound_phone_number": state.config.source_phone_number,
        "telephony_configured": state.config.has_telephony(),
        "voice_ai_configured": state.config.has_voice_ai(),
        "recording_configured": state.config.has_recording_storage(),
    }))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

fn is_valid_call_id(call_id: &str) -> bool {
    !call_id.is_empty() && !call_id.contains("..") && !call_id.contains('/')
}

/// Recording object key: `{prefix}/{call_id}/audio.ogg`.
fn recording_object_key(prefix: Option<&String>, call_id: &str) -> String {
    let normalized = prefix
        .map(|p| p.trim().trim_end_matches('/'))
        .filter(|p| !p.is_empty());
    match normalized {
        Some(prefix) => format!("{prefix}/{call_id}/audio.ogg"),
        None => format!("{call_id}/audio.ogg"),
    }
}

/// `GET /api/calls/{call_id}/recording`
///
/// Resolves the call's recording in object storage. The recording appears
/// some time after the call ends, so "not there yet" is reported as a
/// message rather than a hard 404 body.
pub async fn get_recording(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> AppResult<Json<Value>> {
    if !is_valid_call_id(&call_id) {
        return Err(AppError::InvalidRequest(format!(
            "invalid call id: {call_id}"
        )));
    }

    let store: Arc<dyn ObjectStore> = state
        .object_store
        .clone()
        .ok_or_else(|| AppError::NotConfigured("recording storage not configured".to_string()))?;

    let key = recording_object_key(state.config.s3_prefix.as_ref(), &call_id);
    let path = ObjectPath::from(key.as_str());

    match store.head(&path).await {
        Ok(meta) => {
            info!(call_id, size = meta.size, "recording located");
            Ok(Json(json!({ "recordingUrl": format!("/recordings/{key}") })))
        }
        Err(object_store::Error::NotFound { .. }) => Ok(Json(json!({
            "message": "Recording not available yet"
        }))),
        Err(e) => Err(AppError::Upstream(format!(
            "recording storage lookup failed: {e}"
        ))),
    }
}

/// `GET /recordings/{*key}`: stream a recording object.
pub async fn download_recording(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> AppResult<axum::response::Response> {
    use axum::http::header;
    use axum::response::IntoResponse;

    if key.contains("..") {
        return Err(AppError::InvalidRequest("invalid recording key".to_string()));
    }
    let store: Arc<dyn ObjectStore> = state
        .object_store
        .clone()
        .ok_or_else(|| AppError::NotConfigured("recording storage not configured".to_string()))?;

    let path = ObjectPath::from(key.as_str());
    let result = match store.get(&path).await {
        Ok(result) => result,
        Err(object_store::Error::NotFound { .. }) => {
            return Err(AppError::NotFound(format!("recording {key}")));
        }
        Err(e) => {
            return Err(AppError::Upstream(format!(
                "recording storage read failed: {e}"
            )));
        }
    };

    let data = result
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(format!("recording storage read failed: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "audio/ogg")], data).into_response())
}
