//! Wire messages for the realtime voice-AI WebSocket protocol.
//!
//! Messages are tagged JSON objects; the `type` field selects the variant.
//! Only the events the relay acts on are modeled, everything else falls into
//! [`ServerEvent::Unknown`] and is ignored at a debug log level.

use serde::{Deserialize, Serialize};

/// Session configuration sent immediately after the transport opens.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: VoiceConfig,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_echo_cancellation: Option<EchoCancellation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReduction>,
}

/// Voice selection. Vendor-neural voices carry a structured config, plain
/// voices just a name.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum VoiceConfig {
    Neural {
        name: String,
        #[serde(rename = "type")]
        voice_type: String,
        temperature: f32,
    },
    Named(String),
}

impl VoiceConfig {
    /// Neural voice names contain a locale prefix and a colon-qualified
    /// style, e.g. `en-US-Ava:DragonHDLatestNeural`.
    pub fn from_name(name: &str) -> Self {
        if name.contains(':') || name.ends_with("Neural") {
            VoiceConfig::Neural {
                name: name.to_string(),
                voice_type: "azure-standard".to_string(),
                temperature: 0.8,
            }
        } else {
            VoiceConfig::Named(name.to_string())
        }
    }
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "server_vad")]
pub struct TurnDetection {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 200,
            silence_duration_ms: 500,
        }
    }
}

/// Input transcription model selection.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
        }
    }
}

/// Echo cancellation on the caller input. The server only checks presence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EchoCancellation {}

/// Noise reduction on the caller input.
#[derive(Debug, Clone, Serialize)]
pub struct NoiseReduction {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Default for NoiseReduction {
    fn default() -> Self {
        Self {
            kind: "azure_deep_noise_suppression".to_string(),
        }
    }
}

/// Messages the relay sends to the voice-AI service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

/// Messages the voice-AI service sends to the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.updated")]
    SessionUpdated {},

    /// The caller started speaking; an in-flight agent response must be
    /// cancelled so the agent yields the floor (barge-in).
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},

    /// Final transcription of one caller utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.created")]
    ResponseCreated {},

    /// One chunk of synthesized agent audio, base64 PCM16.
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },

    /// Incremental agent transcript text.
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseTranscriptDelta { delta: String },

    /// Full agent transcript for one response turn.
    #[serde(rename = "response.audio_transcript.done")]
    ResponseTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {},

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    #[serde(other)]
    Unknown,
}

/// Error payload on a server `error` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorDetail {
    /// The service reports a benign race when a cancel arrives after the
    /// response already finished; those are not real failures.
    pub fn is_benign_cancel_race(&self) -> bool {
        self.message
            .as_deref()
            .is_some_and(|m| m.contains("no active response"))
    }
}
