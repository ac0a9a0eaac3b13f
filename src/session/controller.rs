//! Session lifecycle controller.
//!
//! Owns the dialog side of a call: sends the session configuration,
//! consumes the typed event stream, drives the proactive greeting,
//! signals readiness to the bridge, and translates response events into
//! pipeline actions (enqueue audio, track response boundaries, clear on
//! barge-in). Handler failures are logged and never tear down the event
//! dispatch loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bridge::downlink::DownlinkPipeline;
use crate::bridge::CallState;
use crate::config::GatewayConfig;
use crate::session::events::{
    ClientEvent, EchoCancellation, NoiseReduction, ServerEvent, SessionOptions,
    TranscriptionModel, TranscriptionOptions, TurnDetection, VoiceSelection,
};
use crate::session::VoiceSession;

// ── Session state ─────────────────────────────────────────────────

/// Lifecycle of the dialog session. Transitions are monotonic within a
/// call; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Created,
    Configuring,
    Ready,
    Responding,
    Closed,
}

// ── Controller ────────────────────────────────────────────────────

/// Per-call session controller. Shared between the bridge (state and
/// transcript queries, close) and its own dispatch task.
pub struct SessionController {
    session: Arc<dyn VoiceSession>,
    downlink: Arc<DownlinkPipeline>,
    state: Arc<CallState>,
    call_id: String,
    options: SessionOptions,
    greeting_enabled: bool,
    session_state: Mutex<SessionState>,
    response_text: Mutex<String>,
    ready_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("call_id", &self.call_id)
            .field("options", &self.options)
            .field("greeting_enabled", &self.greeting_enabled)
            .field("session_state", &self.session_state)
            .field("response_text", &self.response_text)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub(crate) fn new(
        session: Arc<dyn VoiceSession>,
        downlink: Arc<DownlinkPipeline>,
        state: Arc<CallState>,
        options: SessionOptions,
        greeting_enabled: bool,
        call_id: String,
        ready_tx: watch::Sender<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            downlink,
            state,
            call_id,
            options,
            greeting_enabled,
            session_state: Mutex::new(SessionState::Created),
            response_text: Mutex::new(String::new()),
            ready_tx,
        })
    }

    /// Send the session configuration, then dispatch events until the
    /// stream terminates.
    pub(crate) async fn run(self: Arc<Self>) {
        self.advance_state(SessionState::Configuring);
        let update = ClientEvent::SessionUpdate {
            session: self.options.clone(),
        };
        match self.session.send_event(update).await {
            Ok(()) => info!(call_id = %self.call_id, "session configuration sent"),
            Err(err) => {
                // Readiness will time out and the bridge rejects the call.
                error!(call_id = %self.call_id, error = %err, "failed to send session configuration");
            }
        }

        while let Some(event) = self.session.next_event().await {
            self.handle_event(event).await;
        }
        info!(call_id = %self.call_id, "session event stream completed");
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                info!(call_id = %self.call_id, session_id = %session.id, "session created");
            }

            ServerEvent::SessionUpdated {} => {
                info!(call_id = %self.call_id, "session configured");
                self.advance_state(SessionState::Ready);
                self.state.session_ready.store(true, Ordering::SeqCst);
                let _ = self.ready_tx.send(true);
                self.maybe_send_greeting().await;
            }

            ServerEvent::ResponseCreated {} => {
                debug!(call_id = %self.call_id, "response started");
                self.downlink.begin_response();
                self.advance_state(SessionState::Responding);
            }

            ServerEvent::ResponseAudioDelta { delta } => {
                self.downlink.enqueue_chunk(&delta);
            }

            ServerEvent::ResponseAudioDone {} => {
                info!(call_id = %self.call_id, "response audio complete");
                self.downlink.finish_response();
            }

            ServerEvent::ResponseTextDelta { delta } => {
                if !delta.is_empty() {
                    self.response_text.lock().push_str(&delta);
                }
            }

            ServerEvent::ResponseAudioTimestampDelta {
                audio_offset_ms,
                text,
            } => {
                debug!(
                    call_id = %self.call_id,
                    offset_ms = audio_offset_ms,
                    text = text.as_deref().unwrap_or(""),
                    "audio timestamp"
                );
            }

            ServerEvent::SpeechStarted {} => {
                // Interruption is handled server-side (interrupt_response
                // is configured); the service stops emitting audio itself.
                info!(call_id = %self.call_id, "caller speech detected");
            }

            ServerEvent::SpeechStopped {} => {
                info!(call_id = %self.call_id, "caller speech ended");
            }

            ServerEvent::TranscriptionCompleted { transcript } => {
                info!(call_id = %self.call_id, transcript = %transcript, "caller said");
            }

            ServerEvent::ResponseCancelled {} => {
                info!(call_id = %self.call_id, "response cancelled, flushing pending playback");
                self.downlink.clear_buffer();
            }

            ServerEvent::Error { error } => {
                error!(
                    call_id = %self.call_id,
                    code = error.code.as_deref().unwrap_or("unknown"),
                    message = %error.message,
                    "session error"
                );
            }

            ServerEvent::Unknown => {
                debug!(call_id = %self.call_id, "unhandled session event");
            }
        }
    }

    async fn maybe_send_greeting(&self) {
        if !self.greeting_enabled {
            info!(call_id = %self.call_id, "proactive greeting disabled, waiting for the caller to speak");
            return;
        }
        if self.state.conversation_started.swap(true, Ordering::SeqCst) {
            debug!(call_id = %self.call_id, "conversation already started, skipping greeting");
            return;
        }
        match self.session.send_event(ClientEvent::ResponseCreate {}).await {
            Ok(()) => info!(call_id = %self.call_id, "proactive greeting requested"),
            Err(err) => {
                warn!(call_id = %self.call_id, error = %err, "failed to request proactive greeting");
            }
        }
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        *self.session_state.lock()
    }

    /// Transcript accumulated from `response.text.delta` events.
    pub fn response_text(&self) -> String {
        self.response_text.lock().clone()
    }

    /// Mark the session closed (call teardown).
    pub(crate) fn close(&self) {
        let mut state = self.session_state.lock();
        if *state != SessionState::Closed {
            *state = SessionState::Closed;
            info!(call_id = %self.call_id, "session controller closed");
        }
    }

    fn advance_state(&self, next: SessionState) {
        let mut state = self.session_state.lock();
        if *state == SessionState::Closed || next <= *state {
            return;
        }
        debug!(call_id = %self.call_id, from = ?*state, to = ?next, "session state");
        *state = next;
    }
}

// ── Session options ───────────────────────────────────────────────

/// Build the `session.update` configuration from the gateway config.
pub fn build_session_options(config: &GatewayConfig) -> SessionOptions {
    let model = TranscriptionModel::from_config_str(&config.transcription_model);
    let language = match model {
        // Whisper auto-detects; the reference ASR wants a language tag.
        TranscriptionModel::Whisper1 => None,
        TranscriptionModel::AzureSpeech => Some(config.transcription_language.clone()),
    };

    SessionOptions {
        instructions: config.instructions.clone(),
        modalities: vec!["text".to_string(), "audio".to_string()],
        voice: VoiceSelection::standard(config.voice.as_str()),
        input_audio_format: "pcm16".to_string(),
        output_audio_format: "pcm16".to_string(),
        input_audio_sampling_rate: crate::audio::SERVICE_SAMPLE_RATE,
        turn_detection: TurnDetection {
            kind: "azure_semantic_vad".to_string(),
            threshold: config.tunables.vad_threshold,
            prefix_padding_ms: config.tunables.vad_prefix_padding_ms,
            silence_duration_ms: config.tunables.vad_silence_duration_ms,
            interrupt_response: true,
            auto_truncate: true,
            create_response: true,
        },
        input_audio_noise_reduction: NoiseReduction::deep(),
        input_audio_echo_cancellation: EchoCancellation::default(),
        input_audio_transcription: TranscriptionOptions { model, language },
    }
}

// ── Tests ──────────────────────────────────────────────────────────
