//! Browser voice-session WebSocket handler.
//!
//! `GET /ws` carries a complete call in one socket: the browser sends
//! `start_call` with an optional agenda, streams microphone audio up, and
//! receives agent audio, transcripts and lifecycle frames back. The session
//! is a real registry entry, so it shows up in `GET /api/calls` and on the
//! event stream like any phone call.
//!
//! # Frames
//!
//! Browser to relay:
//! - `{"type": "start_call", "agenda"?, "format"?: "pcm16" | "f32"}`
//! - `{"type": "audio", "data": "<base64>"}`
//! - `{"type": "end_call"}`
//!
//! Relay to browser:
//! - `{"type": "call_started", "callId"}`
//! - `{"type": "audio", "data": "<base64 pcm16>"}`
//! - `{"type": "transcript", "role", "text", "partial"}`
//! - `{"type": "error", "message"}`
//! - `{"type": "call_ended"}`

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bridge::pcm;
use crate::errors::AppResult;
use crate::events::CallEvent;
use crate::state::AppState;

/// Sample encoding the browser uses for its `audio` frames. AudioWorklet
/// captures produce raw f32; everything else defaults to PCM16.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ClientAudioFormat {
    #[default]
    Pcm16,
    F32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    StartCall {
        #[serde(default)]
        agenda: Option<String>,
        #[serde(default)]
        format: ClientAudioFormat,
    },
    Audio {
        data: String,
    },
    EndCall,
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_json(sink: &mut WsSink, value: serde_json::Value) -> bool {
    sink.send(Message::Text(value.to_string().into()))
        .await
        .is_ok()
}

/// `GET /ws`
pub async fn client_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        handle_client_socket(socket, state.clone()).await;
        state.release_ws_slot();
    })
}

async fn handle_client_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("client socket connected");
    let (mut sink, mut stream) = socket.split();

    // The first frame must start a call
    let (agenda, format) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(ClientFrame::StartCall { agenda, format }) => break (agenda, format),
                Ok(_) => {
                    send_json(
                        &mut sink,
                        json!({"type": "error", "message": "expected start_call"}),
                    )
                    .await;
                    let _ = sink.close().await;
                    return;
                }
                Err(e) => {
                    send_json(
                        &mut sink,
                        json!({"type": "error", "message": format!("bad frame: {e}")}),
                    )
                    .await;
                    let _ = sink.close().await;
                    return;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            _ => return,
        }
    };

    let (call_id, bridge) = match state.orchestrator.start_browser_call(agenda).await {
        Ok(started) => started,
        Err(e) => {
            warn!("failed to start browser call: {e}");
            send_json(
                &mut sink,
                json!({"type": "error", "message": e.to_string()}),
            )
            .await;
            let _ = sink.close().await;
            return;
        }
    };

    // A fresh bridge always has a free caller slot
    let Some(mut agent_audio) = bridge.attach_caller().await else {
        state.orchestrator.hangup(&call_id).await.ok();
        let _ = sink.close().await;
        return;
    };
    let mut events = state.orchestrator.hub().subscribe();
    let cancel = bridge.cancellation_token();

    if !send_json(&mut sink, json!({"type": "call_started", "callId": call_id})).await {
        state.orchestrator.hangup(&call_id).await.ok();
        return;
    }

    loop {
        tokio::select! {
            frame = agent_audio.recv() => {
                let Some(audio) = frame else { break };
                if !send_json(
                    &mut sink,
                    json!({"type": "audio", "data": pcm::encode_frame(&audio)}),
                )
                .await
                {
                    break;
                }
            }

            event = events.next() => {
                match event {
                    Some(CallEvent::Transcript { call_id: id, role, text, partial })
                        if id == call_id =>
                    {
                        if !send_json(&mut sink, json!({
                            "type": "transcript",
                            "role": role,
                            "text": text,
                            "partial": partial,
                        })).await {
                            break;
                        }
                    }
                    Some(CallEvent::CallRemoved { call_id: id }) if id == call_id => {
                        debug!(call_id, "call removed, ending client session");
                        break;
                    }
                    Some(_) => {}
                    None => break,
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Audio { data }) => {
                                if let Err(e) = forward_audio(&state, &call_id, format, &data).await {
                                    debug!(call_id, "dropping client frame: {e}");
                                }
                            }
                            Ok(ClientFrame::EndCall) => {
                                info!(call_id, "client requested end of call");
                                break;
                            }
                            Ok(ClientFrame::StartCall { .. }) => {
                                send_json(&mut sink, json!({
                                    "type": "error",
                                    "message": "call already started",
                                })).await;
                            }
                            Err(e) => {
                                debug!(call_id, "unparseable client frame: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(call_id, "client socket closed");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(call_id, "client socket error: {e}");
                        break;
                    }
                }
            }

            _ = cancel.cancelled() => {
                debug!(call_id, "bridge torn down, ending client session");
                break;
            }
        }
    }

    state.orchestrator.hangup(&call_id).await.ok();
    send_json(&mut sink, json!({"type": "call_ended"})).await;
    let _ = sink.close().await;
}

async fn forward_audio(
    state: &Arc<AppState>,
    call_id: &str,
    format: ClientAudioFormat,
    data: &str,
) -> AppResult<()> {
    let frame = match format {
        ClientAudioFormat::Pcm16 => pcm::decode_pcm16_frame(data)?,
        ClientAudioFormat::F32 => pcm::decode_f32_frame(data)?,
    };
    if let Some(bridge) = state.orchestrator.bridge(call_id) {
        bridge
            .caller_audio(frame)
            .await
            .map_err(|e| crate::errors::AppError::Upstream(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_parsing() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"start_call","agenda":"Ask about delivery"}"#).unwrap();
        match frame {
            ClientFrame::StartCall { agenda, format } => {
                assert_eq!(agenda.as_deref(), Some("Ask about delivery"));
                assert_eq!(format, ClientAudioFormat::Pcm16);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"audio","data":"AAAA","format":"f32"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Audio { .. }));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"end_call"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::EndCall));
    }

    #[test]
    fn test_format_parsing() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"start_call","format":"f32"}"#).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::StartCall {
                format: ClientAudioFormat::F32,
                ..
            }
        ));
    }
}
