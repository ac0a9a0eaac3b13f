//! Audio transcoding primitives for the media bridge.
//!
//! The telephony leg speaks G.711 µ-law at 8 kHz; the voice-live service
//! speaks PCM16 at 24 kHz. These modules provide the pure byte-level
//! conversions between the two; everything stateful (buffering, pacing)
//! lives in [`crate::bridge`].

pub mod g711;
pub mod resample;

/// Sample rate of the telephony leg (G.711 µ-law).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate of the voice-live service leg (PCM16).
pub const SERVICE_SAMPLE_RATE: u32 = 24_000;
