//! End-to-end call scenarios against a scripted voice-live session.
//!
//! Each test brings up a full [`MediaBridge`], injects server events
//! the way the service would emit them, and drives the opaque media
//! handles the way the RTP stack would: paced 160-byte reads on the
//! downlink, 20 ms µ-law frames on the uplink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use voicelive_gateway::session::events::{ClientEvent, ServerEvent};
use voicelive_gateway::{BridgeTunables, GatewayConfig, MediaBridge, VoiceSession};

/// µ-law silence, what the bridge plays while it has nothing to say.
const SILENCE: u8 = 0xFF;

/// What a constant PCM16 sample of 8000 encodes to; distinguishable
/// from silence on the wire.
const TONE_ULAW: u8 = 0xA0;
const TONE_SAMPLE: i16 = 8000;

// ── Scripted session ──────────────────────────────────────────────

struct ScriptedSession {
    events: AsyncMutex<mpsc::UnboundedReceiver<ServerEvent>>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    sent_audio: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedSession {
    fn new() -> Arc<Self> {
        let (event_tx, events) = mpsc::unbounded_channel();
        Arc::new(Self {
            events: AsyncMutex::new(events),
            event_tx,
            sent_audio: Mutex::new(Vec::new()),
        })
    }

    fn emit(&self, event: ServerEvent) {
        self.event_tx.send(event).expect("event stream closed");
    }

    /// PCM16 24kHz bytes of a constant tone, sized to transcode into
    /// exactly `packets` downlink payloads.
    fn tone_delta(packets: usize) -> Vec<u8> {
        let samples = packets * 160 * 3;
        let mut pcm = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            pcm.extend_from_slice(&TONE_SAMPLE.to_le_bytes());
        }
        pcm
    }

    fn sent_chunks(&self) -> Vec<Vec<u8>> {
        self.sent_audio.lock().clone()
    }
}

#[async_trait]
impl VoiceSession for ScriptedSession {
    async fn send_input_audio(&self, pcm: Vec<u8>) -> anyhow::Result<()> {
        self.sent_audio.lock().push(pcm);
        Ok(())
    }

    async fn send_event(&self, event: ClientEvent) -> anyhow::Result<()> {
        // Acknowledge the configuration like the live service does.
        if let ClientEvent::SessionUpdate { .. } = event {
            let _ = self.event_tx.send(ServerEvent::SessionUpdated {});
        }
        Ok(())
    }

    async fn next_event(&self) -> Option<ServerEvent> {
        self.events.lock().await.recv().await
    }
}

fn config() -> GatewayConfig {
    GatewayConfig {
        endpoint: "wss://test.example.com".into(),
        api_key: "key".into(),
        model: "gpt-realtime".into(),
        voice: "en-US-Ava".into(),
        instructions: "be brief".into(),
        transcription_model: "AZURE_SPEECH".into(),
        transcription_language: "en-US".into(),
        api_version: "2025-10-01".into(),
        max_response_output_tokens: 200,
        proactive_greeting_enabled: false,
        tunables: BridgeTunables::default(),
    }
}

async fn bridge_up(session: &Arc<ScriptedSession>) -> MediaBridge {
    MediaBridge::start(session.clone(), &config())
        .await
        .expect("bridge failed to start")
}

/// Read until the downlink yields a full data (non-silence) packet, or
/// panic after the deadline. Returns the packet.
fn read_until_data(
    source: &voicelive_gateway::DownlinkSource,
    deadline: Duration,
) -> [u8; 160] {
    let start = Instant::now();
    let mut buf = [0u8; 160];
    loop {
        let n = source.read(&mut buf).expect("stream closed unexpectedly");
        if n == 160 && buf.iter().any(|&b| b != SILENCE) {
            return buf;
        }
        assert!(
            start.elapsed() < deadline,
            "no downlink data within {deadline:?}"
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

// ── Scenario 1: silence-only call ─────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn silence_only_call_keeps_rtp_cadence() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;
    let source = bridge.downlink_source();

    let reads = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 160];
        let mut total = Vec::new();
        for _ in 0..50 {
            let n = source.read(&mut buf).expect("closed");
            total.extend_from_slice(&buf[..n]);
        }
        total
    })
    .await
    .unwrap();

    assert_eq!(reads.len(), 50 * 160);
    assert!(reads.iter().all(|&b| b == SILENCE));
    bridge.close().await;
}

// ── Scenario 2: small greeting below the prebuffer threshold ──────

#[tokio::test(flavor = "multi_thread")]
async fn short_greeting_plays_out_completely() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;
    let source = bridge.downlink_source();

    // One 7200-byte delta (150 ms of PCM16 @ 24kHz) and then done:
    // 1200 bytes of µ-law = 7 full packets + 80 bytes left in the
    // partial buffer. Far below the 25-packet prebuffer threshold, so
    // only the response-complete fast path lets it play.
    session.emit(ServerEvent::ResponseCreated {});
    session.emit(ServerEvent::ResponseAudioDelta {
        delta: {
            let mut pcm = Vec::new();
            for _ in 0..3600 {
                pcm.extend_from_slice(&TONE_SAMPLE.to_le_bytes());
            }
            pcm
        },
    });
    session.emit(ServerEvent::ResponseAudioDone {});

    let drained = tokio::task::spawn_blocking(move || {
        let first = read_until_data(&source, Duration::from_secs(1));
        let mut data = first.to_vec();
        let mut buf = [0u8; 160];
        // Drain until the queue reports empty (a 0-length read).
        loop {
            let n = source.read(&mut buf).expect("closed");
            if n == 0 {
                break;
            }
            if buf[..n].iter().any(|&b| b != SILENCE) {
                data.extend_from_slice(&buf[..n]);
            }
        }
        // After the drain the pipeline is prebuffering again: silence.
        let n = source.read(&mut buf).expect("closed");
        assert_eq!(n, 160);
        assert!(buf.iter().all(|&b| b == SILENCE));
        data
    })
    .await
    .unwrap();

    // All 7 packets played; the 80-byte remainder stayed behind.
    assert_eq!(drained.len(), 7 * 160);
    assert!(drained.iter().all(|&b| b == TONE_ULAW));
    bridge.close().await;
}

// ── Scenario 3: burst then long gap, response complete ────────────

#[tokio::test(flavor = "multi_thread")]
async fn burst_with_response_done_drains_without_pausing() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;
    let source = bridge.downlink_source();

    // 200 packets arrive essentially instantaneously, then the service
    // goes quiet for good.
    session.emit(ServerEvent::ResponseCreated {});
    for _ in 0..20 {
        session.emit(ServerEvent::ResponseAudioDelta {
            delta: ScriptedSession::tone_delta(10),
        });
    }
    session.emit(ServerEvent::ResponseAudioDone {});

    let (packets, tail) = tokio::task::spawn_blocking(move || {
        let first = read_until_data(&source, Duration::from_secs(1));
        let mut packets = 1usize;
        assert!(first.iter().all(|&b| b == TONE_ULAW));

        let mut buf = [0u8; 160];
        loop {
            let n = source.read(&mut buf).expect("closed");
            if n == 0 {
                break;
            }
            // With the response complete the reader must never pause
            // into silence, however low the queue gets.
            assert!(buf[..n].iter().all(|&b| b == TONE_ULAW));
            packets += n / 160;
        }
        let n = source.read(&mut buf).expect("closed");
        (packets, (n, buf))
    })
    .await
    .unwrap();

    assert_eq!(packets, 200);
    // Queue drained and reset: back to prebuffering silence.
    assert_eq!(tail.0, 160);
    assert!(tail.1.iter().all(|&b| b == SILENCE));
    bridge.close().await;
}

// ── Scenario 4: mid-burst gap without response.done ───────────────

#[tokio::test(flavor = "multi_thread")]
async fn mid_response_gap_pauses_then_resumes_at_high_water() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;
    let source = bridge.downlink_source();

    // 50 packets, response still open: below the low watermark, so the
    // reader pauses instead of draining into an underrun.
    session.emit(ServerEvent::ResponseCreated {});
    session.emit(ServerEvent::ResponseAudioDelta {
        delta: ScriptedSession::tone_delta(50),
    });

    let source_paused = source.clone();
    tokio::task::spawn_blocking(move || {
        // Wait for the prebuffer to fill, then observe the pause.
        let start = Instant::now();
        let mut buf = [0u8; 160];
        loop {
            let n = source_paused.read(&mut buf).expect("closed");
            assert_eq!(n, 160);
            assert!(
                buf.iter().all(|&b| b == SILENCE),
                "reader must not drain a short open response below low water"
            );
            if start.elapsed() > Duration::from_millis(100) {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    })
    .await
    .unwrap();

    // The second burst lifts the queue to the high watermark: resume.
    session.emit(ServerEvent::ResponseAudioDelta {
        delta: ScriptedSession::tone_delta(100),
    });

    let packet = tokio::task::spawn_blocking(move || {
        read_until_data(&source, Duration::from_secs(1))
    })
    .await
    .unwrap();
    assert!(packet.iter().all(|&b| b == TONE_ULAW));
    bridge.close().await;
}

// ── Scenario 5: barge-in clears pending playback ──────────────────

#[tokio::test(flavor = "multi_thread")]
async fn barge_in_flushes_and_reprebuffers() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;
    let source = bridge.downlink_source();

    // An active response with 80 packets pending.
    session.emit(ServerEvent::ResponseCreated {});
    session.emit(ServerEvent::ResponseAudioDelta {
        delta: ScriptedSession::tone_delta(80),
    });

    // The caller starts talking; the service cancels the response.
    session.emit(ServerEvent::SpeechStarted {});
    session.emit(ServerEvent::ResponseCancelled {});

    // Give the dispatch task a moment to process the script, then make
    // sure nothing but silence comes out.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let source_silent = source.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 160];
        for _ in 0..10 {
            let n = source_silent.read(&mut buf).expect("closed");
            assert_eq!(n, 160);
            assert!(buf.iter().all(|&b| b == SILENCE), "pre-clear audio leaked");
        }
    })
    .await
    .unwrap();

    // A fresh response prebuffers from scratch and then plays.
    session.emit(ServerEvent::ResponseCreated {});
    session.emit(ServerEvent::ResponseAudioDelta {
        delta: ScriptedSession::tone_delta(25),
    });

    let packet = tokio::task::spawn_blocking(move || {
        read_until_data(&source, Duration::from_secs(1))
    })
    .await
    .unwrap();
    assert!(packet.iter().all(|&b| b == TONE_ULAW));
    bridge.close().await;
}

// ── Scenario 6: uplink chunking ───────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn uplink_frames_coalesce_into_exact_chunks() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;
    let sink = bridge.uplink_sink();

    // 30 paced RTP frames of 20 ms µ-law.
    for _ in 0..30 {
        sink.write(&[SILENCE; 160]);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // 30 frames × 960 bytes of PCM24 = 6 chunks of exactly 100 ms.
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if session.sent_chunks().len() >= 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("uplink chunks never arrived");

    let chunks = session.sent_chunks();
    assert_eq!(chunks.len(), 6);
    for chunk in &chunks {
        assert_eq!(chunk.len(), 4_800);
        assert_eq!(chunk.len() % 2, 0);
    }
    bridge.close().await;
}

// ── Transcript and session state across a call ────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn transcript_accumulates_and_state_advances() {
    let session = ScriptedSession::new();
    let bridge = bridge_up(&session).await;

    session.emit(ServerEvent::ResponseCreated {});
    session.emit(ServerEvent::ResponseTextDelta {
        delta: "Hello! ".into(),
    });
    session.emit(ServerEvent::ResponseTextDelta {
        delta: "How can I help?".into(),
    });
    session.emit(ServerEvent::ResponseAudioDone {});

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if bridge.response_text() == "Hello! How can I help?" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("transcript never accumulated");

    assert_eq!(
        bridge.session_state(),
        voicelive_gateway::SessionState::Responding
    );
    bridge.close().await;
}
