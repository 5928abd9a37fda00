//! Per-call audio bridge.
//!
//! An [`AudioBridge`] owns the agent leg of exactly one call and relays audio
//! between it and the caller transport. The caller leg is attached lazily:
//! for phone calls the media WebSocket arrives from the vendor some time
//! after the call is placed, for browser calls it is the session socket
//! itself.
//!
//! Teardown is idempotent and always runs the same sequence regardless of
//! which side ended the call: cancel the token, close the agent leg, drop
//! the caller sink.

pub mod pcm;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentLeg, AgentResult, TranscriptFragment};
use crate::errors::{AppError, AppResult};
use crate::events::{CallEvent, EventHub};

/// Outgoing frames buffered toward the caller before the bridge starts
/// dropping. Audio is realtime; late frames are worthless.
const CALLER_SINK_CAPACITY: usize = 128;

/// Callback invoked when the agent leg fails or drops; the orchestrator uses
/// it to mark the call disconnected and tear down.
pub type BridgeFailureCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Relays audio between one caller transport and one agent leg.
pub struct AudioBridge {
    call_id: String,
    agent: Arc<Mutex<Box<dyn AgentLeg>>>,
    caller_sink: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for AudioBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBridge")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

impl AudioBridge {
    /// Wire the agent leg's callbacks and open it. Transcript fragments are
    /// fanned out through `hub`; agent failures are reported via `on_failure`
    /// exactly once.
    pub async fn start(
        call_id: String,
        mut agent: Box<dyn AgentLeg>,
        hub: Arc<EventHub>,
        on_failure: BridgeFailureCallback,
    ) -> AppResult<Self> {
        let caller_sink: Arc<Mutex<Option<mpsc::Sender<Bytes>>>> = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        {
            let sink = caller_sink.clone();
            agent.on_audio(Arc::new(move |audio: Bytes| {
                let sink = sink.clone();
                Box::pin(async move {
                    if let Some(tx) = sink.lock().await.as_ref() {
                        // try_send: a congested caller loses frames, the
                        // bridge never stalls the agent leg
                        let _ = tx.try_send(audio);
                    }
                })
            }));
        }

        {
            let hub = hub.clone();
            let id = call_id.clone();
            agent.on_transcript(Arc::new(move |fragment: TranscriptFragment| {
                let hub = hub.clone();
                let id = id.clone();
                Box::pin(async move {
                    hub.publish(CallEvent::Transcript {
                        call_id: id,
                        role: fragment.role,
                        text: fragment.text,
                        partial: fragment.partial,
                    });
                })
            }));
        }

        {
            let on_failure = on_failure.clone();
            let id = call_id.clone();
            agent.on_error(Arc::new(move |err| {
                let on_failure = on_failure.clone();
                let id = id.clone();
                Box::pin(async move {
                    on_failure(format!("agent session error on call {id}: {err}")).await;
                })
            }));
        }

        {
            let id = call_id.clone();
            agent.on_closed(Arc::new(move || {
                let on_failure = on_failure.clone();
                let id = id.clone();
                Box::pin(async move {
                    on_failure(format!("agent leg dropped on call {id}")).await;
                })
            }));
        }

        agent
            .connect()
            .await
            .map_err(|e| AppError::Upstream(format!("agent connect failed: {e}")))?;

        Ok(Self {
            call_id,
            agent: Arc::new(Mutex::new(agent)),
            caller_sink,
            cancel,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Token cancelled when the bridge shuts down; caller transports select
    /// on it to exit their read loops.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Adopt a caller transport, first one wins. Returns the receiving half
    /// of the agent-to-caller audio stream, or `None` when a transport is
    /// already attached (duplicate media sockets are ignored, not errors).
    pub async fn attach_caller(&self) -> Option<mpsc::Receiver<Bytes>> {
        let mut guard = self.caller_sink.lock().await;
        if guard.is_some() {
            tracing::warn!(call_id = %self.call_id, "caller transport already attached, ignoring");
            return None;
        }
        let (tx, rx) = mpsc::channel(CALLER_SINK_CAPACITY);
        *guard = Some(tx);
        tracing::debug!(call_id = %self.call_id, "caller transport attached");
        Some(rx)
    }

    /// Detach the caller transport so a closed socket stops receiving frames.
    pub async fn detach_caller(&self) {
        self.caller_sink.lock().await.take();
    }

    /// Forward one caller audio frame (PCM16 LE, 24 kHz) to the agent.
    pub async fn caller_audio(&self, audio: Bytes) -> AgentResult<()> {
        self.agent.lock().await.send_audio(audio).await
    }

    /// Whether the agent leg is accepting audio yet.
    pub async fn is_agent_ready(&self) -> bool {
        self.agent.lock().await.is_ready()
    }

    /// Tear the bridge down: cancel transports, close the agent leg, drop
    /// the caller sink. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.caller_sink.lock().await.take();
        if let Err(e) = self.agent.lock().await.disconnect().await {
            tracing::warn!(call_id = %self.call_id, "agent disconnect during teardown: {e}");
        }
        tracing::info!(call_id = %self.call_id, "audio bridge shut down");
    }
}
