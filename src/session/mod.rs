//! Voice-live session integration.
//!
//! [`VoiceSession`] is the seam to the external session transport: the
//! bridge core only needs to push raw audio bytes, push control events,
//! and pull typed server events. [`controller::SessionController`]
//! drives the dialog lifecycle on top of that seam.

pub mod controller;
pub mod events;

use async_trait::async_trait;

pub use controller::{SessionController, SessionState};
pub use events::{ClientEvent, ServerEvent, SessionOptions, TranscriptionModel};

/// An already-started voice-live session.
///
/// Implementations own the transport (connection, authentication, JSON
/// framing) and surface it as three operations. Audio bytes are raw
/// PCM16 little-endian at the configured sample rate, unframed; events
/// are the parsed wire messages of [`events`].
#[async_trait]
pub trait VoiceSession: Send + Sync {
    /// Send caller audio to the session. Chunks from one call must
    /// reach the service in submission order.
    async fn send_input_audio(&self, pcm: Vec<u8>) -> anyhow::Result<()>;

    /// Send a control event (`session.update`, `response.create`).
    async fn send_event(&self, event: ClientEvent) -> anyhow::Result<()>;

    /// Receive the next server event; `None` once the event stream has
    /// terminated.
    async fn next_event(&self) -> Option<ServerEvent>;
}
