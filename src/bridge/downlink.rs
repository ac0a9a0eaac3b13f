//! Downlink media pipeline: voice-live service → SIP caller.
//!
//! Mediates between a bursty producer (the service emits PCM16 24kHz
//! audio deltas of unpredictable size and cadence) and a strict
//! consumer (the RTP sender requests one 20 ms µ-law packet every
//! 20 ms of wall clock). The producer side transcodes and packetises
//! into fixed 160-byte payloads; the consumer side applies adaptive
//! prebuffering and low/high-watermark pause hysteresis so that
//! delivery gaps surface as clean silence instead of audible glitches.
//!
//! ```text
//! response.audio.delta ─▸ split ─▸ 24k→8k ─▸ µ-law ─▸ packetise ─▸ queue
//!                                                                   │
//! RTP sender ◂─────────────── read(): prebuffer / watermarks ◂──────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{g711, resample};
use crate::config::BridgeTunables;

/// The queue is unbounded by design; sizes beyond this are logged as a
/// warning once per excursion. Dropping packets would distort audio and
/// the producer is bounded by response length.
const QUEUE_SATURATION_PACKETS: usize = 800;

/// Queue sizes below this after a read are logged at debug.
const QUEUE_LOW_HEALTH_PACKETS: usize = 20;

/// Downlink pipeline for one call.
///
/// The producer side (`enqueue_chunk`) is called from the session event
/// dispatch task; the consumer side (`read`) is called from the RTP
/// sender thread. Both are safe to use concurrently.
#[derive(Debug)]
pub struct DownlinkPipeline {
    tunables: BridgeTunables,
    packet_tx: Sender<Vec<u8>>,
    packet_rx: Receiver<Vec<u8>>,
    /// Partial RTP payload carried across producer chunks. The lock is
    /// shared with `clear_buffer` so packetisation and clearing never
    /// interleave mid-chunk.
    partial: Mutex<Vec<u8>>,
    prebuffered: AtomicBool,
    paused: AtomicBool,
    response_done: AtomicBool,
    closed: AtomicBool,
    saturation_warned: AtomicBool,
}

impl DownlinkPipeline {
    pub(crate) fn new(tunables: BridgeTunables) -> Self {
        let (packet_tx, packet_rx) = unbounded();
        let payload = tunables.rtp_payload_bytes;
        Self {
            tunables,
            packet_tx,
            packet_rx,
            partial: Mutex::new(Vec::with_capacity(payload)),
            prebuffered: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            response_done: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            saturation_warned: AtomicBool::new(false),
        }
    }

    // ── Producer side ─────────────────────────────────────────────

    /// Transcode one service audio delta (PCM16 24kHz) and queue it as
    /// RTP payloads. Oversized deltas are split first so a single burst
    /// cannot monopolise the partial-packet buffer.
    pub fn enqueue_chunk(&self, pcm24k: &[u8]) {
        if self.closed.load(Ordering::SeqCst) || pcm24k.is_empty() {
            return;
        }
        if pcm24k.len() % 2 != 0 {
            debug!(bytes = pcm24k.len(), "odd-length service delta, truncating to whole samples");
        }
        if pcm24k.len() > self.tunables.max_delta_chunk_bytes {
            debug!(
                bytes = pcm24k.len(),
                max = self.tunables.max_delta_chunk_bytes,
                "splitting oversized service delta"
            );
        }
        for piece in pcm24k.chunks(self.tunables.max_delta_chunk_bytes) {
            let pcm8k = resample::downsample_24k_to_8k(piece);
            let ulaw = g711::encode(&pcm8k);
            self.packetize_and_queue(&ulaw);
        }
    }

    /// Append µ-law bytes to the partial payload, queueing every full
    /// packet. Runs under the partial-buffer lock.
    fn packetize_and_queue(&self, ulaw: &[u8]) {
        let payload = self.tunables.rtp_payload_bytes;
        let mut partial = self.partial.lock();
        let mut offset = 0;
        while offset < ulaw.len() {
            let space = payload - partial.len();
            let take = space.min(ulaw.len() - offset);
            partial.extend_from_slice(&ulaw[offset..offset + take]);
            offset += take;

            if partial.len() == payload {
                let packet = std::mem::replace(&mut *partial, Vec::with_capacity(payload));
                let queued = self.packet_rx.len() + 1;
                if self.packet_tx.send(packet).is_err() {
                    return;
                }
                if !self.prebuffered.load(Ordering::SeqCst)
                    && queued >= self.tunables.min_prebuffer_packets
                {
                    self.prebuffered.store(true, Ordering::SeqCst);
                    info!(packets = queued, "prebuffering complete, downlink playback can start");
                }
                if queued > QUEUE_SATURATION_PACKETS {
                    if !self.saturation_warned.swap(true, Ordering::SeqCst) {
                        warn!(packets = queued, "downlink queue saturated");
                    }
                } else {
                    self.saturation_warned.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// A new response started; audio for it is on the way.
    pub(crate) fn begin_response(&self) {
        self.response_done.store(false, Ordering::SeqCst);
    }

    /// The service finished sending audio for the current response.
    ///
    /// A short response can complete without ever reaching the
    /// prebuffer threshold; start playback anyway so its tail is not
    /// stuck behind a threshold that will never be met.
    pub(crate) fn finish_response(&self) {
        self.response_done.store(true, Ordering::SeqCst);
        if !self.prebuffered.load(Ordering::SeqCst) && !self.packet_rx.is_empty() {
            self.prebuffered.store(true, Ordering::SeqCst);
            info!(
                packets = self.packet_rx.len(),
                "response complete below prebuffer threshold, starting playback"
            );
        }
    }

    /// Drop all queued audio immediately (caller barge-in). Safe from
    /// any thread; the next audible output is either silence or audio
    /// enqueued strictly after this call.
    pub fn clear_buffer(&self) {
        let mut partial = self.partial.lock();
        while self.packet_rx.try_recv().is_ok() {}
        partial.clear();
        self.prebuffered.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        info!("downlink buffers cleared, prebuffering restarts with the next response");
    }

    /// Close the pipeline; subsequent reads return `None`. A reader
    /// blocked in its first-packet poll is woken promptly.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut partial = self.partial.lock();
            while self.packet_rx.try_recv().is_ok() {}
            partial.clear();
        }
        // Zero-length wake sentinel for a reader mid-poll.
        let _ = self.packet_tx.send(Vec::new());
        info!("downlink pipeline closed");
    }

    // ── Consumer side ─────────────────────────────────────────────

    /// Blocking paced read for the RTP sender.
    ///
    /// Returns `None` once the pipeline is closed, otherwise the number
    /// of bytes written into `buf`: a multiple of the payload size, the
    /// full buffer of µ-law silence while prebuffering or paused, or
    /// `0` for "no data right now, retry".
    ///
    /// Blocks at most the first-packet poll timeout (40 ms by default);
    /// once one packet arrived, further packets are batched with the
    /// short poll until the buffer has no room for another full payload.
    pub fn read(&self, buf: &mut [u8]) -> Option<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        if buf.is_empty() {
            return Some(0);
        }

        // Not yet prebuffered: fill with silence so the sender keeps
        // its RTP cadence without ever blocking on us.
        if !self.prebuffered.load(Ordering::SeqCst) {
            buf.fill(g711::ULAW_SILENCE);
            return Some(buf.len());
        }

        let queued = self.packet_rx.len();
        let response_done = self.response_done.load(Ordering::SeqCst);

        // Pause hysteresis. Never pause once the response is complete:
        // the tail of a finished response always plays out.
        if !self.paused.load(Ordering::SeqCst)
            && queued < self.tunables.low_water_packets
            && !response_done
        {
            self.paused.store(true, Ordering::SeqCst);
            warn!(
                packets = queued,
                low_water = self.tunables.low_water_packets,
                "queue low, pausing downlink while the service catches up"
            );
        }
        if self.paused.load(Ordering::SeqCst) && response_done {
            self.paused.store(false, Ordering::SeqCst);
            info!("response complete, resuming downlink to finish playback");
        }
        if self.paused.load(Ordering::SeqCst) && queued >= self.tunables.high_water_packets {
            self.paused.store(false, Ordering::SeqCst);
            info!(packets = queued, "queue replenished, resuming downlink");
        }
        if self.paused.load(Ordering::SeqCst) {
            buf.fill(g711::ULAW_SILENCE);
            return Some(buf.len());
        }

        let payload = self.tunables.rtp_payload_bytes;
        let mut total = 0;
        while buf.len() - total >= payload {
            let timeout = if total == 0 {
                self.tunables.read_first_timeout
            } else {
                self.tunables.read_batch_timeout
            };
            match self.packet_rx.recv_timeout(timeout) {
                Ok(packet) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return None;
                    }
                    if packet.is_empty() {
                        continue;
                    }
                    buf[total..total + packet.len()].copy_from_slice(&packet);
                    total += packet.len();
                }
                Err(RecvTimeoutError::Timeout) => {
                    if total == 0 {
                        if response_done && self.packet_rx.is_empty() {
                            // Response fully consumed; the next one
                            // prebuffers from scratch.
                            self.prebuffered.store(false, Ordering::SeqCst);
                            debug!("queue drained, prebuffering reset for next response");
                        } else {
                            warn!("downlink underrun, no audio available");
                        }
                        return Some(0);
                    }
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }

        let remaining = self.packet_rx.len();
        if remaining < QUEUE_LOW_HEALTH_PACKETS {
            debug!(packets = remaining, bytes = total, "downlink queue running low");
        }
        Some(total)
    }

    // ── Introspection ─────────────────────────────────────────────

    /// Number of full packets currently queued.
    pub fn queued_packets(&self) -> usize {
        self.packet_rx.len()
    }

    /// Whether the prebuffer threshold has been reached since the last
    /// interrupt or drain.
    pub fn is_prebuffered(&self) -> bool {
        self.prebuffered.load(Ordering::SeqCst)
    }

    /// Whether the reader is currently paused between watermarks.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn partial_len(&self) -> usize {
        self.partial.lock().len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
