//! Real-time media bridge between a telephony endpoint and a
//! voice-live conversational service.
//!
//! A caller speaks over SIP/RTP carrying G.711 µ-law at 8 kHz; the
//! remote service speaks PCM16 at 24 kHz over a bidirectional event
//! stream. This crate is the per-call core in between: it transcodes,
//! resamples, paces, buffers, and rate-adapts both directions while
//! driving the dialog session (configuration, readiness, proactive
//! greeting, voice-activity-driven interruptions, transcription).
//!
//! ```text
//! SIP/RTP (µ-law 8kHz)            voice-live service (PCM16 24kHz)
//!   RTP receiver ──▸ UplinkSink ─────▸ send_input_audio
//!   RTP sender  ◂── DownlinkSource ◂── response.audio.delta events
//! ```
//!
//! ## Design
//! - [`bridge::MediaBridge`] — per-call assembly; hands the signalling
//!   layer two opaque byte handles and owns everything behind them
//! - [`bridge::UplinkPipeline`] / [`bridge::DownlinkPipeline`] — the
//!   two media directions, including prebuffering and low/high
//!   watermark pause hysteresis on the downlink
//! - [`session::SessionController`] — dialog lifecycle over the
//!   [`session::VoiceSession`] transport seam
//! - [`audio`] — pure G.711 µ-law and 8↔24 kHz conversions
//!
//! The SIP stack and the service transport are external collaborators:
//! the bridge consumes an already-negotiated media flow on one side and
//! an already-started session on the other.

pub mod audio;
pub mod bridge;
pub mod config;
pub mod session;

pub use bridge::{DownlinkSource, MediaBridge, UplinkSink};
pub use config::{BridgeTunables, GatewayConfig};
pub use session::{ClientEvent, ServerEvent, SessionController, SessionState, VoiceSession};
