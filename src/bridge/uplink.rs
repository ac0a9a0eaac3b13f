//! Uplink media pipeline: SIP caller → voice-live service.
//!
//! The RTP receiver hands us µ-law 8kHz payloads (typically 160 bytes
//! every 20 ms) on its own thread. Each write decodes and upsamples to
//! PCM16 24kHz and accumulates until a 100 ms chunk is complete; full
//! chunks travel over a channel to a single sender task so they reach
//! the service in arrival order without ever blocking the RTP thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::audio::{g711, resample};
use crate::bridge::CallState;
use crate::config::BridgeTunables;
use crate::session::VoiceSession;

/// Uplink pipeline for one call.
#[derive(Debug)]
pub struct UplinkPipeline {
    state: Arc<CallState>,
    accumulator: Mutex<Vec<u8>>,
    /// `None` once the call tears down; dropping the sender lets the
    /// sender task drain what is queued and exit.
    chunk_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    min_chunk_bytes: usize,
    not_ready_logged: AtomicBool,
}

impl UplinkPipeline {
    /// Create the pipeline and the receiving end of its chunk channel;
    /// the bridge feeds the receiver into [`run_sender`].
    pub(crate) fn new(
        tunables: &BridgeTunables,
        state: Arc<CallState>,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let min_chunk_bytes = tunables.min_uplink_chunk_bytes();
        (
            Self {
                state,
                accumulator: Mutex::new(Vec::with_capacity(min_chunk_bytes * 2)),
                chunk_tx: Mutex::new(Some(chunk_tx)),
                min_chunk_bytes,
                not_ready_logged: AtomicBool::new(false),
            },
            chunk_rx,
        )
    }

    /// Accept one µ-law payload from the RTP receiver.
    ///
    /// Never blocks and never fails into the caller: audio arriving
    /// before the session is ready is dropped (logged once), everything
    /// else is transcoded and handed to the sender task.
    pub fn write(&self, ulaw: &[u8]) {
        if ulaw.is_empty() {
            return;
        }
        if !self.state.session_ready.load(Ordering::SeqCst) {
            if !self.not_ready_logged.swap(true, Ordering::SeqCst) {
                warn!("session not ready, dropping caller audio");
            }
            return;
        }

        let pcm8k = g711::decode(ulaw);
        let pcm24k = resample::upsample_8k_to_24k(&pcm8k);

        let tx = self.chunk_tx.lock();
        let Some(tx) = tx.as_ref() else {
            // Call is tearing down.
            return;
        };
        let mut acc = self.accumulator.lock();
        acc.extend_from_slice(&pcm24k);
        while acc.len() >= self.min_chunk_bytes {
            let rest = acc.split_off(self.min_chunk_bytes);
            let chunk = std::mem::replace(&mut *acc, rest);
            trace!(bytes = chunk.len(), "uplink chunk complete");
            if tx.send(chunk).is_err() {
                return;
            }
        }
    }

    /// Emit whatever is left in the accumulator (always whole samples).
    pub fn flush(&self) {
        let tx = self.chunk_tx.lock();
        let Some(tx) = tx.as_ref() else {
            return;
        };
        let mut acc = self.accumulator.lock();
        if !acc.is_empty() {
            let chunk = std::mem::take(&mut *acc);
            debug!(bytes = chunk.len(), "flushing residual uplink audio");
            let _ = tx.send(chunk);
        }
    }

    /// Flush the residue and close the chunk channel; the sender task
    /// drains whatever is queued and stops. Called on call teardown.
    pub(crate) fn close(&self) {
        let mut tx = self.chunk_tx.lock();
        let Some(sender) = tx.take() else {
            return;
        };
        let mut acc = self.accumulator.lock();
        if !acc.is_empty() {
            let chunk = std::mem::take(&mut *acc);
            debug!(bytes = chunk.len(), "flushing residual uplink audio");
            let _ = sender.send(chunk);
        }
    }
}

/// Forward completed uplink chunks to the service, in order.
///
/// Send failures are logged and never propagate back to the RTP thread;
/// the "standalone audio chunk" conflict the service raises during an
/// active response is expected and suppressed.
pub(crate) async fn run_sender(
    mut chunk_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    session: Arc<dyn VoiceSession>,
    state: Arc<CallState>,
) {
    while let Some(chunk) = chunk_rx.recv().await {
        if !state.streaming_audio.swap(true, Ordering::SeqCst) {
            info!("started audio streaming to the service");
        }
        let bytes = chunk.len();
        match session.send_input_audio(chunk).await {
            Ok(()) => trace!(bytes, "sent caller audio chunk"),
            Err(err) if is_transient_stream_conflict(&err) => {
                debug!(error = %err, "audio streaming conflict (expected during a response)");
            }
            Err(err) => error!(error = %err, "failed to send caller audio chunk"),
        }
    }
    debug!("uplink sender stopped");
}

fn is_transient_stream_conflict(err: &anyhow::Error) -> bool {
    format!("{err:#}").contains("standalone audio chunk")
}

// ── Tests ──────────────────────────────────────────────────────────
