//! Per-call media bridge.
//!
//! [`MediaBridge`] binds the two media pipelines and the session
//! controller for one call and hands the signalling layer two opaque
//! handles: a byte sink the RTP receiver writes µ-law into and a byte
//! source the RTP sender reads µ-law packets from. Everything in
//! between (transcoding, pacing, prebuffering, barge-in, the dialog
//! lifecycle) stays internal to the bridge.
//!
//! ```text
//! RTP receiver ─▸ UplinkSink ─▸ UplinkPipeline ─▸ sender task ─▸ service
//! RTP sender  ◂─ DownlinkSource ◂─ DownlinkPipeline ◂─ SessionController ◂─ events
//! ```

pub mod downlink;
pub mod uplink;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::session::controller::build_session_options;
use crate::session::{SessionController, SessionState, VoiceSession};
pub use downlink::DownlinkPipeline;
pub use uplink::UplinkPipeline;

// ── Shared call state ─────────────────────────────────────────────

/// Scalar flags shared between the pipelines and the controller.
/// Written from one task, read from others; sequential ordering keeps
/// them coherent across threads.
#[derive(Debug)]
pub(crate) struct CallState {
    /// The session accepted our configuration; uplink audio may flow.
    pub(crate) session_ready: AtomicBool,
    /// The proactive greeting (or first caller turn) has been kicked off.
    pub(crate) conversation_started: AtomicBool,
    /// At least one uplink chunk has been sent this call.
    pub(crate) streaming_audio: AtomicBool,
}

impl CallState {
    pub(crate) fn new() -> Self {
        Self {
            session_ready: AtomicBool::new(false),
            conversation_started: AtomicBool::new(false),
            streaming_audio: AtomicBool::new(false),
        }
    }
}

// ── Opaque media handles ──────────────────────────────────────────

/// Byte sink handed to the RTP receiver. Cheap to clone.
#[derive(Clone)]
pub struct UplinkSink {
    pipeline: Arc<UplinkPipeline>,
}

impl UplinkSink {
    /// Accept one received RTP payload (µ-law 8kHz). Never blocks.
    pub fn write(&self, ulaw: &[u8]) {
        self.pipeline.write(ulaw);
    }

    /// Push any accumulated residue to the service.
    pub fn flush(&self) {
        self.pipeline.flush();
    }
}

/// Byte source handed to the RTP sender. Cheap to clone.
#[derive(Clone)]
pub struct DownlinkSource {
    pipeline: Arc<DownlinkPipeline>,
}

impl DownlinkSource {
    /// Blocking paced read; see [`DownlinkPipeline::read`]. Returns
    /// `None` once the bridge is closed.
    pub fn read(&self, buf: &mut [u8]) -> Option<usize> {
        self.pipeline.read(buf)
    }
}

// ── Media bridge ──────────────────────────────────────────────────

/// The per-call assembly. Owns both pipelines, the controller, and the
/// background tasks; lifetime equals call lifetime.
#[derive(Debug)]
pub struct MediaBridge {
    call_id: String,
    uplink: Arc<UplinkPipeline>,
    downlink: Arc<DownlinkPipeline>,
    controller: Arc<SessionController>,
    dispatch_task: JoinHandle<()>,
    sender_task: JoinHandle<()>,
}

impl MediaBridge {
    /// Build the bridge on top of an already-started session: wire the
    /// pipelines, send the session configuration, and wait for the
    /// service to become ready.
    ///
    /// Fails if readiness does not arrive within the configured timeout
    /// so the signalling layer can reject the call.
    pub async fn start(session: Arc<dyn VoiceSession>, config: &GatewayConfig) -> Result<Self> {
        let call_id = Uuid::new_v4().to_string();
        info!(call_id = %call_id, "starting media bridge");

        let state = Arc::new(CallState::new());
        let downlink = Arc::new(DownlinkPipeline::new(config.tunables.clone()));
        let (uplink, chunk_rx) = UplinkPipeline::new(&config.tunables, state.clone());
        let uplink = Arc::new(uplink);

        let (ready_tx, mut ready_rx) = watch::channel(false);
        let controller = SessionController::new(
            session.clone(),
            downlink.clone(),
            state.clone(),
            build_session_options(config),
            config.proactive_greeting_enabled,
            call_id.clone(),
            ready_tx,
        );

        let dispatch_task = tokio::spawn(controller.clone().run());
        let sender_task = tokio::spawn(uplink::run_sender(chunk_rx, session, state));

        let ready = tokio::time::timeout(
            config.tunables.session_ready_timeout,
            ready_rx.wait_for(|ready| *ready),
        )
        .await;
        match ready {
            Ok(Ok(_)) => {
                info!(call_id = %call_id, "session ready, media bridge up");
            }
            Ok(Err(_)) | Err(_) => {
                downlink.close();
                uplink.close();
                controller.close();
                dispatch_task.abort();
                sender_task.abort();
                bail!(
                    "session did not become ready within {:?}, rejecting call {call_id}",
                    config.tunables.session_ready_timeout
                );
            }
        }

        Ok(Self {
            call_id,
            uplink,
            downlink,
            controller,
            dispatch_task,
            sender_task,
        })
    }

    /// The byte sink for the RTP receiver.
    pub fn uplink_sink(&self) -> UplinkSink {
        UplinkSink {
            pipeline: self.uplink.clone(),
        }
    }

    /// The byte source for the RTP sender.
    pub fn downlink_source(&self) -> DownlinkSource {
        DownlinkSource {
            pipeline: self.downlink.clone(),
        }
    }

    /// Identifier of this call in logs.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Current dialog session state.
    pub fn session_state(&self) -> SessionState {
        self.controller.session_state()
    }

    /// Transcript of the assistant's responses so far.
    pub fn response_text(&self) -> String {
        self.controller.response_text()
    }

    /// Tear the call down: close the downlink (readers observe end of
    /// stream promptly), flush and close the uplink, stop the
    /// background tasks.
    pub async fn close(self) {
        info!(call_id = %self.call_id, "closing media bridge");
        self.downlink.close();
        self.uplink.close();
        self.controller.close();

        // The sender drains queued chunks once its channel closes; the
        // dispatch task may be parked on a dead event stream, stop it.
        let mut sender_task = self.sender_task;
        if tokio::time::timeout(std::time::Duration::from_secs(1), &mut sender_task)
            .await
            .is_err()
        {
            warn!(call_id = %self.call_id, "uplink sender did not drain in time, aborting");
            sender_task.abort();
        }
        self.dispatch_task.abort();
        info!(call_id = %self.call_id, "media bridge closed");
    }
}

// ── Tests ──────────────────────────────────────────────────────────
