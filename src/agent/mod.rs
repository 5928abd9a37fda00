//! Voice-agent leg of the audio bridge.
//!
//! This module defines the abstractions for the realtime voice-AI transport:
//! a bidirectional WebSocket session that accepts caller audio and produces
//! synthesized audio plus transcript fragments.
//!
//! # Audio format
//!
//! The agent leg carries PCM 16-bit signed little-endian at 24 kHz, matching
//! the telephony media stream, so no resampling happens anywhere in the
//! relay.

pub mod client;
pub mod messages;

pub use client::VoiceLiveClient;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::events::SpeakerRole;

/// Errors that can occur on the agent leg.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connection to the voice-AI endpoint failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Required agent configuration is missing
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Wire message could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote session reported an error
    #[error("session error: {0}")]
    Session(String),

    /// Not connected
    #[error("not connected")]
    NotConnected,
}

/// Result type for agent-leg operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Per-call settings used to open an agent session.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Voice-AI service endpoint (https://... or wss://...)
    pub endpoint: String,
    /// API key for the voice-AI service
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Voice identifier; vendor-neural names (e.g. "en-US-Ava:...") are sent
    /// as structured voice config, bare names as-is
    pub voice: String,
    /// Resolved agenda text steering the agent for this call
    pub instructions: String,
    /// Owning call identifier, used for log correlation only
    pub call_id: String,
}

/// A piece of recognized or synthesized speech attributed to one speaker.
/// Immutable once emitted.
#[derive(Debug, Clone)]
pub struct TranscriptFragment {
    pub role: SpeakerRole,
    pub text: String,
    /// In-progress fragment; consumers may keep only final fragments
    pub partial: bool,
}

/// Callback type for synthesized audio from the agent.
pub type AudioCallback =
    Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for transcript fragments.
pub type TranscriptCallback =
    Arc<dyn Fn(TranscriptFragment) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for agent-leg errors.
pub type AgentErrorCallback =
    Arc<dyn Fn(AgentError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type invoked when the agent transport closes unexpectedly.
pub type ClosedCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One live agent session.
///
/// There is no reconnection: a dropped agent leg is a terminal failure for
/// the owning call, and any redial is a new call with a new identifier.
#[async_trait]
pub trait AgentLeg: Send + Sync {
    /// Open the transport and send the initial session configuration.
    async fn connect(&mut self) -> AgentResult<()>;

    /// Close the transport. Suppresses the closed callback.
    async fn disconnect(&mut self) -> AgentResult<()>;

    /// Whether the session handshake completed and audio is accepted.
    fn is_ready(&self) -> bool;

    /// Forward one caller audio frame (PCM16 LE, 24 kHz mono). Frames that
    /// arrive before the session is ready are dropped, never queued.
    async fn send_audio(&self, audio: Bytes) -> AgentResult<()>;

    /// Register the synthesized-audio callback. Must be called before
    /// `connect`.
    fn on_audio(&mut self, callback: AudioCallback);

    /// Register the transcript callback. Must be called before `connect`.
    fn on_transcript(&mut self, callback: TranscriptCallback);

    /// Register the error callback. Must be called before `connect`.
    fn on_error(&mut self, callback: AgentErrorCallback);

    /// Register the unexpected-close callback. Must be called before
    /// `connect`.
    fn on_closed(&mut self, callback: ClosedCallback);
}

/// Factory seam for opening agent sessions, so the orchestrator can be
/// exercised with mock legs in tests.
pub trait AgentConnector: Send + Sync {
    /// Build an unconnected agent leg for one call.
    fn create(&self, settings: AgentSettings) -> AgentResult<Box<dyn AgentLeg>>;
}

/// Connector producing [`VoiceLiveClient`] sessions against a configured
/// endpoint.
pub struct VoiceLiveConnector {
    pub endpoint: String,
    pub api_key: String,
}

impl AgentConnector for VoiceLiveConnector {
    fn create(&self, mut settings: AgentSettings) -> AgentResult<Box<dyn AgentLeg>> {
        settings.endpoint = self.endpoint.clone();
        settings.api_key = self.api_key.clone();
        Ok(Box::new(VoiceLiveClient::new(settings)?))
    }
}

/// Connector used when no voice-AI endpoint is configured; every call
/// attempt fails with a configuration error instead of panicking at startup.
pub struct UnconfiguredConnector;

impl AgentConnector for UnconfiguredConnector {
    fn create(&self, _settings: AgentSettings) -> AgentResult<Box<dyn AgentLeg>> {
        Err(AgentError::InvalidConfiguration(
            "voice-AI endpoint is not configured".to_string(),
        ))
    }
}
