//! Realtime voice-AI WebSocket client.
//!
//! Endpoint: `wss://<resource>/voice-live/realtime?api-version=...&model=...`
//! Protocol: WebSocket with tagged JSON events.
//! Audio: PCM 16-bit, 24 kHz, mono, little-endian, base64 encoded.
//!
//! Unlike a long-lived assistant session, an agent leg lives exactly as long
//! as its call. There is no reconnection: when the transport drops, the
//! closed callback fires and the owning call is torn down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::prelude::*;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::messages::{
    ClientEvent, EchoCancellation, NoiseReduction, ServerEvent, SessionConfig,
    TranscriptionConfig, TurnDetection, VoiceConfig,
};
use super::{
    AgentError, AgentLeg, AgentResult, AgentSettings, AudioCallback, AgentErrorCallback,
    ClosedCallback, TranscriptCallback, TranscriptFragment,
};
use crate::events::SpeakerRole;

/// Channel capacity for outgoing WebSocket messages.
const WS_CHANNEL_CAPACITY: usize = 256;

/// API version the session endpoint expects.
const API_VERSION: &str = "2025-05-01-preview";

/// Voice-AI realtime client.
///
/// All mutable state is behind `Arc` so it can be shared with the spawned
/// WebSocket task; `connected` and `ready` use `AtomicBool` for lock-free
/// checks on the audio path.
pub struct VoiceLiveClient {
    settings: AgentSettings,
    ws_url: Url,

    /// Transport is open
    connected: Arc<AtomicBool>,
    /// Session handshake acknowledged; audio is accepted
    ready: Arc<AtomicBool>,
    /// An agent response is in flight, so barge-in must cancel it
    response_active: Arc<AtomicBool>,
    /// Set by `disconnect` to suppress the closed callback
    intentional_disconnect: Arc<AtomicBool>,

    /// WebSocket sender channel
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,

    audio_callback: Arc<Mutex<Option<AudioCallback>>>,
    transcript_callback: Arc<Mutex<Option<TranscriptCallback>>>,
    error_callback: Arc<Mutex<Option<AgentErrorCallback>>>,
    closed_callback: Arc<Mutex<Option<ClosedCallback>>>,

    /// Connection task handle
    connection_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl VoiceLiveClient {
    pub fn new(settings: AgentSettings) -> AgentResult<Self> {
        if settings.api_key.is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if settings.endpoint.is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "endpoint is required".to_string(),
            ));
        }

        let ws_url = Self::build_ws_url(&settings.endpoint, &settings.model)?;

        Ok(Self {
            settings,
            ws_url,
            connected: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(false)),
            response_active: Arc::new(AtomicBool::new(false)),
            intentional_disconnect: Arc::new(AtomicBool::new(false)),
            ws_sender: Arc::new(Mutex::new(None)),
            audio_callback: Arc::new(Mutex::new(None)),
            transcript_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
            closed_callback: Arc::new(Mutex::new(None)),
            connection_handle: Arc::new(Mutex::new(None)),
        })
    }

    /// Derive the realtime WebSocket URL from the service endpoint.
    fn build_ws_url(endpoint: &str, model: &str) -> AgentResult<Url> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| AgentError::InvalidConfiguration(format!("invalid endpoint: {e}")))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(AgentError::InvalidConfiguration(format!(
                    "unsupported endpoint scheme: {other}"
                )));
            }
        };
        // set_scheme only fails for invalid schemes, which these are not
        let _ = url.set_scheme(scheme);
        url.set_path("/voice-live/realtime");
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", API_VERSION)
            .append_pair("model", model);
        Ok(url)
    }

    fn build_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: self.settings.instructions.clone(),
            voice: VoiceConfig::from_name(&self.settings.voice),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: Some(TurnDetection::default()),
            input_audio_transcription: Some(TranscriptionConfig::default()),
            input_audio_echo_cancellation: Some(EchoCancellation::default()),
            input_audio_noise_reduction: Some(NoiseReduction::default()),
        }
    }

    /// Dispatch one server event to the registered callbacks.
    #[allow(clippy::too_many_arguments)]
    async fn handle_server_event(
        event: ServerEvent,
        call_id: &str,
        audio_cb: &Arc<Mutex<Option<AudioCallback>>>,
        transcript_cb: &Arc<Mutex<Option<TranscriptCallback>>>,
        error_cb: &Arc<Mutex<Option<AgentErrorCallback>>>,
        ws_sender: &Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
        ready: &Arc<AtomicBool>,
        response_active: &Arc<AtomicBool>,
    ) {
        match event {
            ServerEvent::SessionUpdated {} => {
                tracing::info!(call_id, "voice-AI session ready");
                ready.store(true, Ordering::SeqCst);
            }

            ServerEvent::SpeechStarted { audio_start_ms } => {
                tracing::debug!(call_id, ?audio_start_ms, "caller speech started");
                // Barge-in: the caller took the floor, cancel any in-flight
                // agent response so stale audio stops streaming.
                if response_active.swap(false, Ordering::SeqCst)
                    && let Some(tx) = ws_sender.lock().await.as_ref()
                {
                    let _ = tx.send(ClientEvent::ResponseCancel).await;
                }
            }

            ServerEvent::SpeechStopped {} => {
                tracing::debug!(call_id, "caller speech stopped");
            }

            ServerEvent::ResponseCreated {} => {
                response_active.store(true, Ordering::SeqCst);
            }

            ServerEvent::ResponseDone {} => {
                response_active.store(false, Ordering::SeqCst);
            }

            ServerEvent::ResponseAudioDelta { delta } => {
                match BASE64_STANDARD.decode(&delta) {
                    Ok(audio) => {
                        if let Some(cb) = audio_cb.lock().await.as_ref() {
                            cb(Bytes::from(audio)).await;
                        }
                    }
                    Err(e) => {
                        tracing::error!(call_id, "failed to decode agent audio delta: {e}");
                    }
                }
            }

            ServerEvent::InputTranscriptionCompleted { transcript } => {
                if let Some(cb) = transcript_cb.lock().await.as_ref() {
                    cb(TranscriptFragment {
                        role: SpeakerRole::Caller,
                        text: transcript,
                        partial: false,
                    })
                    .await;
                }
            }

            ServerEvent::ResponseTranscriptDelta { delta } => {
                if let Some(cb) = transcript_cb.lock().await.as_ref() {
                    cb(TranscriptFragment {
                        role: SpeakerRole::Agent,
                        text: delta,
                        partial: true,
                    })
                    .await;
                }
            }

            ServerEvent::ResponseTranscriptDone { transcript } => {
                if let Some(cb) = transcript_cb.lock().await.as_ref() {
                    cb(TranscriptFragment {
                        role: SpeakerRole::Agent,
                        text: transcript,
                        partial: false,
                    })
                    .await;
                }
            }

            ServerEvent::Error { error } => {
                // A cancel racing a finished response is routine, not a fault
                if error.is_benign_cancel_race() {
                    tracing::debug!(call_id, "response cancel raced completion");
                    return;
                }
                let message = error
                    .message
                    .unwrap_or_else(|| "unknown session error".to_string());
                tracing::error!(call_id, code = ?error.code, "voice-AI session error: {message}");
                if let Some(cb) = error_cb.lock().await.as_ref() {
                    cb(AgentError::Session(message)).await;
                }
            }

            ServerEvent::Unknown => {
                tracing::trace!(call_id, "unhandled server event");
            }
        }
    }
}

#[async_trait]
impl AgentLeg for VoiceLiveClient {
    async fn connect(&mut self) -> AgentResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.intentional_disconnect.store(false, Ordering::SeqCst);

        let host = self
            .ws_url
            .host_str()
            .ok_or_else(|| AgentError::InvalidConfiguration("endpoint has no host".to_string()))?
            .to_string();

        let request = http::Request::builder()
            .uri(self.ws_url.as_str())
            .header("api-key", &self.settings.api_key)
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| AgentError::ConnectionFailed(e.to_string()))?;

        tracing::info!(call_id = %self.settings.call_id, "connected to voice-AI endpoint");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        *self.ws_sender.lock().await = Some(tx.clone());

        let call_id = self.settings.call_id.clone();
        let audio_cb = self.audio_callback.clone();
        let transcript_cb = self.transcript_callback.clone();
        let error_cb = self.error_callback.clone();
        let closed_cb = self.closed_callback.clone();
        let ws_sender = self.ws_sender.clone();
        let connected = self.connected.clone();
        let ready = self.ready.clone();
        let response_active = self.response_active.clone();
        let intentional_disconnect = self.intentional_disconnect.clone();

        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = rx.recv() => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(call_id, "failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!(call_id, "failed to send WebSocket message: {e}");
                            break;
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        Self::handle_server_event(
                                            event,
                                            &call_id,
                                            &audio_cb,
                                            &transcript_cb,
                                            &error_cb,
                                            &ws_sender,
                                            &ready,
                                            &response_active,
                                        ).await;
                                    }
                                    Err(e) => {
                                        tracing::warn!(call_id, "failed to parse server event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                            Some(Ok(Message::Close(frame))) => {
                                tracing::info!(call_id, ?frame, "voice-AI connection closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!(call_id, "WebSocket error: {e}");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            ready.store(false, Ordering::SeqCst);
            ws_sender.lock().await.take();

            if !intentional_disconnect.load(Ordering::SeqCst) {
                tracing::warn!(call_id, "voice-AI connection dropped");
                if let Some(cb) = closed_cb.lock().await.as_ref() {
                    cb().await;
                }
            }
        });
        *self.connection_handle.lock().await = Some(handle);

        // Configure the session; `session.updated` flips the ready flag
        let session = self.build_session_config();
        tx.send(ClientEvent::SessionUpdate { session })
            .await
            .map_err(|e| AgentError::WebSocket(e.to_string()))?;

        Ok(())
    }

    async fn disconnect(&mut self) -> AgentResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.ws_sender.lock().await.take();

        if let Some(handle) = self.connection_handle.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        tracing::info!(call_id = %self.settings.call_id, "disconnected from voice-AI endpoint");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.ready.load(Ordering::SeqCst)
    }

    async fn send_audio(&self, audio: Bytes) -> AgentResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AgentError::NotConnected);
        }
        if !self.ready.load(Ordering::SeqCst) {
            // Session is still configuring; frames are dropped, not queued
            tracing::trace!(call_id = %self.settings.call_id, "dropping audio before session ready");
            return Ok(());
        }

        let event = ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(&audio),
        };
        let guard = self.ws_sender.lock().await;
        let tx = guard.as_ref().ok_or(AgentError::NotConnected)?;
        tx.send(event)
            .await
            .map_err(|e| AgentError::WebSocket(e.to_string()))
    }

    fn on_audio(&mut self, callback: AudioCallback) {
        register_callback(&self.audio_callback, callback);
    }

    fn on_transcript(&mut self, callback: TranscriptCallback) {
        register_callback(&self.transcript_callback, callback);
    }

    fn on_error(&mut self, callback: AgentErrorCallback) {
        register_callback(&self.error_callback, callback);
    }

    fn on_closed(&mut self, callback: ClosedCallback) {
        register_callback(&self.closed_callback, callback);
    }
}

/// Store a callback without blocking. Registration happens before `connect`,
/// so the lock is normally free; the spawn fallback only covers a race with
/// the connection task.
fn register_callback<T: Send + 'static>(slot: &Arc<Mutex<Option<T>>>, callback: T) {
    if let Ok(mut guard) = slot.try_lock() {
        *guard = Some(callback);
    } else {
        let slot = slot.clone();
        tokio::spawn(async move {
            *slot.lock().await = Some(callback);
        });
    }
}
