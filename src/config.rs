//! Gateway configuration.
//!
//! [`GatewayConfig`] carries the per-deployment settings read from the
//! environment (service endpoint, credentials, voice, transcription) and
//! [`BridgeTunables`] carries the media-path knobs with their defaults.
//! Everything is plain data; the bridge takes a copy per call.

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

/// Default system prompt when `VOICE_LIVE_INSTRUCTIONS` is unset.
const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI voice assistant. \
     Keep responses VERY brief and concise. Answer in 1-2 sentences maximum. \
     You MUST always respond in English only, regardless of the language \
     spoken by the user.";

/// Deployment configuration for the voice-live service connection.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Service endpoint (`https://` or `wss://`).
    pub endpoint: String,
    /// API key for the service.
    pub api_key: String,
    /// Model identifier (e.g. `gpt-realtime`).
    pub model: String,
    /// Provider voice name (opaque string).
    pub voice: String,
    /// System prompt for the dialog session.
    pub instructions: String,
    /// Transcription backend selector (`AZURE_SPEECH` or `WHISPER_1`).
    pub transcription_model: String,
    /// Language tag for the reference-ASR transcription backend.
    pub transcription_language: String,
    /// Service API version.
    pub api_version: String,
    /// Response length target. Accepted for forward compatibility but
    /// not yet part of the session options the service accepts; brevity
    /// is steered through `instructions`.
    pub max_response_output_tokens: u32,
    /// Whether the assistant speaks first once the session is ready.
    pub proactive_greeting_enabled: bool,
    /// Media-path tuning knobs.
    pub tunables: BridgeTunables,
}

impl GatewayConfig {
    /// Read the configuration from process environment variables.
    ///
    /// `VOICE_LIVE_ENDPOINT`, `VOICE_LIVE_API_KEY`, `VOICE_LIVE_MODEL`
    /// and `VOICE_LIVE_VOICE` are required; everything else has a
    /// default.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            match lookup(key) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => bail!("environment variable {key} is required but not set"),
            }
        };
        let optional =
            |key: &str, default: &str| lookup(key).filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string());

        let endpoint = required("VOICE_LIVE_ENDPOINT")?;
        if !endpoint.starts_with("https://") && !endpoint.starts_with("wss://") {
            bail!("VOICE_LIVE_ENDPOINT must start with https:// or wss://");
        }

        let max_response_output_tokens = match lookup("VOICE_LIVE_MAX_RESPONSE_OUTPUT_TOKENS") {
            Some(value) if !value.is_empty() => value
                .parse()
                .map_err(|_| anyhow::anyhow!("VOICE_LIVE_MAX_RESPONSE_OUTPUT_TOKENS must be a number"))?,
            _ => 200,
        };

        Ok(Self {
            endpoint,
            api_key: required("VOICE_LIVE_API_KEY")?,
            model: required("VOICE_LIVE_MODEL")?,
            voice: required("VOICE_LIVE_VOICE")?,
            instructions: optional("VOICE_LIVE_INSTRUCTIONS", DEFAULT_INSTRUCTIONS),
            transcription_model: optional("VOICE_LIVE_TRANSCRIPTION_MODEL", "AZURE_SPEECH"),
            transcription_language: optional("VOICE_LIVE_TRANSCRIPTION_LANGUAGE", "en-US"),
            api_version: optional("VOICE_LIVE_API_VERSION", "2025-10-01"),
            max_response_output_tokens,
            proactive_greeting_enabled: optional("VOICE_LIVE_PROACTIVE_GREETING_ENABLED", "true")
                .eq_ignore_ascii_case("true"),
            tunables: BridgeTunables::default(),
        })
    }

    /// WebSocket URL for the realtime endpoint:
    /// `wss://<resource>/voice-live/realtime?api-version=<v>&model=<m>`.
    pub fn websocket_url(&self) -> String {
        let mut base = if let Some(rest) = self.endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            self.endpoint.clone()
        };
        while base.ends_with('/') {
            base.pop();
        }
        format!(
            "{base}/voice-live/realtime?api-version={}&model={}",
            self.api_version, self.model
        )
    }
}

// ── Media-path tunables ───────────────────────────────────────────

/// Tuning knobs for the media bridge. All fields are public and
/// overridable; the defaults match the production deployment.
#[derive(Debug, Clone)]
pub struct BridgeTunables {
    /// Size of one downlink RTP payload (20 ms of µ-law at 8 kHz).
    pub rtp_payload_bytes: usize,
    /// Packets that must be queued before downlink playback starts
    /// (~500 ms prebuffer masking bursty service delivery).
    pub min_prebuffer_packets: usize,
    /// Below this queue size the reader pauses, unless the response is
    /// already complete.
    pub low_water_packets: usize,
    /// At or above this queue size a paused reader resumes.
    pub high_water_packets: usize,
    /// Oversized service deltas are split into pieces of at most this
    /// many bytes (~200 ms of PCM16 at 24 kHz).
    pub max_delta_chunk_bytes: usize,
    /// Minimum uplink flush granularity in milliseconds.
    pub min_uplink_chunk_ms: u32,
    /// Downlink reader poll for the first packet of a read.
    pub read_first_timeout: Duration,
    /// Downlink reader poll for each subsequent packet of a read.
    pub read_batch_timeout: Duration,
    /// Maximum wait for the session to become ready.
    pub session_ready_timeout: Duration,
    /// Semantic VAD sensitivity.
    pub vad_threshold: f32,
    /// Milliseconds of audio kept before detected speech start.
    pub vad_prefix_padding_ms: u32,
    /// Milliseconds of silence that end an utterance.
    pub vad_silence_duration_ms: u32,
}

impl Default for BridgeTunables {
    fn default() -> Self {
        Self {
            rtp_payload_bytes: 160,
            min_prebuffer_packets: 25,
            low_water_packets: 100,
            high_water_packets: 150,
            max_delta_chunk_bytes: 9_600,
            min_uplink_chunk_ms: 100,
            read_first_timeout: Duration::from_millis(40),
            read_batch_timeout: Duration::from_millis(5),
            session_ready_timeout: Duration::from_secs(10),
            vad_threshold: 0.3,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
        }
    }
}

impl BridgeTunables {
    /// Minimum uplink chunk in bytes of PCM16 at the service rate.
    pub fn min_uplink_chunk_bytes(&self) -> usize {
        self.min_uplink_chunk_ms as usize * crate::audio::SERVICE_SAMPLE_RATE as usize * 2 / 1000
    }
}

// ── Tests ──────────────────────────────────────────────────────────
