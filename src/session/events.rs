//! Wire event schema for the voice-live session.
//!
//! Defines the JSON message types exchanged with the voice-live service
//! during a call. The transport (WebSocket connection, authentication,
//! frame handling) lives outside this crate; implementations of
//! [`crate::session::VoiceSession`] parse inbound text frames into
//! [`ServerEvent`] and serialize [`ClientEvent`] for outbound frames.
//!
//! ## Protocol
//!
//! ```text
//! gateway ── session.update ──────────▸ voice-live
//!         ── response.create ─────────▸   (proactive greeting)
//!         ── raw PCM16 24kHz audio ───▸   (via send_input_audio)
//!         ◂── session.created / session.updated
//!         ◂── response.created / response.audio.delta / response.audio.done
//!         ◂── response.text.delta / response.audio_timestamp.delta
//!         ◂── input_audio_buffer.speech_started / speech_stopped
//!         ◂── conversation.item.input_audio_transcription.completed
//!         ◂── response.cancelled / error
//! ```
//!
//! All messages are JSON with a `type` tag. Audio deltas carry base64
//! payloads on the wire; deserialization yields raw PCM16 bytes.

use serde::{Deserialize, Serialize};

// ── Server → gateway events ───────────────────────────────────────

/// Typed events received from the voice-live session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The service created the session.
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionMeta,
    },

    /// The service accepted our `session.update` configuration.
    #[serde(rename = "session.updated")]
    SessionUpdated {},

    /// A new response turn has started.
    #[serde(rename = "response.created")]
    ResponseCreated {},

    /// A chunk of response audio (PCM16 24kHz, base64 on the wire).
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        #[serde(with = "b64")]
        delta: Vec<u8>,
    },

    /// The service finished sending audio for the current response.
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {},

    /// A chunk of the response transcript.
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { delta: String },

    /// Word-level timing for the response audio (diagnostic).
    #[serde(rename = "response.audio_timestamp.delta")]
    ResponseAudioTimestampDelta {
        #[serde(default)]
        audio_offset_ms: u64,
        #[serde(default)]
        text: Option<String>,
    },

    /// Server-side VAD detected the caller starting to speak.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},

    /// Server-side VAD detected the caller going silent.
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},

    /// Transcription of the caller's completed utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    /// The service cancelled the in-flight response (caller barge-in).
    #[serde(rename = "response.cancelled")]
    ResponseCancelled {},

    /// Error reported by the service.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    /// Any event type this gateway does not act on.
    #[serde(other)]
    Unknown,
}

/// Session identification payload of `session.created`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionMeta {
    #[serde(default)]
    pub id: String,
}

/// Error payload of an `error` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

// ── Gateway → server events ───────────────────────────────────────

/// Control events sent to the voice-live session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure the session; sent once immediately after start.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionOptions },

    /// Ask the service to produce a response with no user input
    /// (proactive greeting).
    #[serde(rename = "response.create")]
    ResponseCreate {},
}

// ── Session configuration ─────────────────────────────────────────

/// The `session.update` configuration block.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOptions {
    pub instructions: String,
    pub modalities: Vec<String>,
    pub voice: VoiceSelection,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_sampling_rate: u32,
    pub turn_detection: TurnDetection,
    pub input_audio_noise_reduction: NoiseReduction,
    pub input_audio_echo_cancellation: EchoCancellation,
    pub input_audio_transcription: TranscriptionOptions,
}

/// Voice selection (opaque provider voice name).
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSelection {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl VoiceSelection {
    pub fn standard(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "azure-standard".to_string(),
        }
    }
}

/// Semantic voice-activity turn detection configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub interrupt_response: bool,
    pub auto_truncate: bool,
    pub create_response: bool,
}

/// Input noise suppression configuration.
#[derive(Debug, Clone, Serialize)]
pub struct NoiseReduction {
    #[serde(rename = "type")]
    pub kind: String,
}

impl NoiseReduction {
    pub fn deep() -> Self {
        Self {
            kind: "azure_deep_noise_suppression".to_string(),
        }
    }
}

/// Server-side echo cancellation (enabled by presence).
#[derive(Debug, Clone, Default, Serialize)]
pub struct EchoCancellation {}

/// Input transcription configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionOptions {
    pub model: TranscriptionModel,
    /// Language tag, only meaningful for the reference-ASR model
    /// (whisper auto-detects).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Selectable transcription backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TranscriptionModel {
    #[serde(rename = "azure-speech")]
    AzureSpeech,
    #[serde(rename = "whisper-1")]
    Whisper1,
}

impl TranscriptionModel {
    /// Parse the configuration string (case-insensitive); anything that
    /// is not the whisper selector falls back to the reference ASR.
    pub fn from_config_str(value: &str) -> Self {
        if value.eq_ignore_ascii_case("whisper_1") || value.eq_ignore_ascii_case("whisper-1") {
            Self::Whisper1
        } else {
            Self::AzureSpeech
        }
    }
}

// ── Base64 audio payloads ─────────────────────────────────────────

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
