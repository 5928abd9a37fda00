//! Vendor media-stream WebSocket handler.
//!
//! The telephony vendor opens a WebSocket against `/ws/media` (or
//! `/ws/media/{call_id}`) once media streaming starts and exchanges tagged
//! JSON frames: an `AudioMetadata` frame first, then `AudioData` frames with
//! base64 PCM16 both ways.
//!
//! The plain `/ws/media` form carries no call identifier, so the socket is
//! adopted by the most recently created active call that does not have a
//! caller transport yet. Adoption is first-wins and idempotent; a duplicate
//! socket for an already-adopted call is drained and ignored.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::AudioBridge;
use crate::bridge::pcm;
use crate::state::AppState;

/// How long to wait for the audio bridge to appear after the socket opens.
/// The vendor connects immediately after the connected event, racing the
/// bridge startup.
const BRIDGE_WAIT_ATTEMPTS: u32 = 10;
const BRIDGE_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Frames the vendor sends on the media socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum MediaFrame {
    AudioMetadata {
        #[serde(rename = "audioMetadata", default)]
        metadata: serde_json::Value,
    },
    AudioData {
        #[serde(rename = "audioData")]
        audio: AudioPayload,
    },
}

#[derive(Debug, Deserialize)]
struct AudioPayload {
    data: String,
    #[serde(default)]
    silent: bool,
}

/// `GET /ws/media`
pub async fn media_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        handle_media_socket(socket, state.clone(), None).await;
        state.release_ws_slot();
    })
}

/// `GET /ws/media/{call_id}`
pub async fn media_ws_with_id(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        handle_media_socket(socket, state.clone(), Some(call_id)).await;
        state.release_ws_slot();
    })
}

/// Wait for the call's bridge to exist, then adopt it.
async fn adopt_by_id(
    state: &Arc<AppState>,
    call_id: &str,
) -> Option<(Arc<AudioBridge>, mpsc::Receiver<Bytes>)> {
    for _ in 0..BRIDGE_WAIT_ATTEMPTS {
        if let Some(bridge) = state.orchestrator.bridge(call_id) {
            let rx = bridge.attach_caller().await?;
            return Some((bridge, rx));
        }
        tokio::time::sleep(BRIDGE_WAIT_INTERVAL).await;
    }
    warn!(call_id, "no bridge appeared for media socket");
    None
}

/// Adopt the newest active call without a caller transport.
async fn adopt_newest_active(
    state: &Arc<AppState>,
) -> Option<(String, Arc<AudioBridge>, mpsc::Receiver<Bytes>)> {
    let active = state.orchestrator.registry().list_active();
    for session in active.iter().rev() {
        if let Some(bridge) = state.orchestrator.bridge(&session.call_id)
            && let Some(rx) = bridge.attach_caller().await
        {
            return Some((session.call_id.clone(), bridge, rx));
        }
    }
    None
}

async fn handle_media_socket(socket: WebSocket, state: Arc<AppState>, call_id: Option<String>) {
    info!(?call_id, "media socket connected");
    let (mut sink, mut stream) = socket.split();

    // With an explicit call id the bridge is adopted up front; otherwise
    // adoption waits for the metadata frame.
    let mut adopted: Option<(String, Arc<AudioBridge>, mpsc::Receiver<Bytes>)> = match call_id {
        Some(id) => match adopt_by_id(&state, &id).await {
            Some((bridge, rx)) => Some((id, bridge, rx)),
            None => {
                let _ = sink.close().await;
                return;
            }
        },
        None => None,
    };

    loop {
        match &mut adopted {
            Some((id, bridge, rx)) => {
                let cancel = bridge.cancellation_token();
                tokio::select! {
                    // Agent audio toward the phone
                    frame = rx.recv() => {
                        let Some(audio) = frame else { break };
                        let out = json!({
                            "kind": "AudioData",
                            "audioData": {
                                "data": pcm::encode_frame(&audio),
                                "silent": false,
                            }
                        });
                        if sink.send(Message::Text(out.to_string().into())).await.is_err() {
                            break;
                        }
                    }

                    // Phone audio toward the agent
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                handle_media_frame(id, bridge, &text).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!(call_id = %id, "media socket closed by vendor");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(call_id = %id, "media socket error: {e}");
                                break;
                            }
                        }
                    }

                    _ = cancel.cancelled() => {
                        debug!(call_id = %id, "bridge torn down, closing media socket");
                        break;
                    }
                }
            }

            None => {
                // Not adopted yet; only the metadata frame can adopt
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(MediaFrame::AudioMetadata { metadata }) =
                            serde_json::from_str::<MediaFrame>(&text)
                        {
                            debug!(?metadata, "media metadata received");
                            adopted = adopt_newest_active(&state).await;
                            if adopted.is_none() {
                                warn!("no active call available to adopt media socket");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("media socket error before adoption: {e}");
                        break;
                    }
                }
            }
        }
    }

    if let Some((id, bridge, _)) = adopted {
        bridge.detach_caller().await;
        // Caller transport gone: the call is over regardless of what the
        // vendor reports afterwards
        state.orchestrator.hangup(&id).await.ok();
    }
    let _ = sink.close().await;
}

async fn handle_media_frame(call_id: &str, bridge: &AudioBridge, text: &str) {
    match serde_json::from_str::<MediaFrame>(text) {
        Ok(MediaFrame::AudioData { audio }) => {
            if audio.silent {
                return;
            }
            match pcm::decode_pcm16_frame(&audio.data) {
                Ok(frame) => {
                    if let Err(e) = bridge.caller_audio(frame).await {
                        debug!(call_id, "dropping caller frame: {e}");
                    }
                }
                Err(e) => warn!(call_id, "bad audio frame from vendor: {e}"),
            }
        }
        Ok(MediaFrame::AudioMetadata { .. }) => {
            debug!(call_id, "media metadata after adoption");
        }
        Err(e) => {
            warn!(call_id, "unparseable media frame: {e}");
        }
    }
}
