//! Sample-rate conversion between the telephony leg (8 kHz) and the
//! voice-live service leg (24 kHz).
//!
//! The 1:3 ratio keeps both directions integer-only: upsampling emits
//! three output samples per input via linear interpolation, downsampling
//! averages each group of three. Speech-grade content from the service
//! side needs no further anti-alias filtering beyond the averaging.
//!
//! All functions take and return little-endian PCM16 byte slices; an odd
//! trailing byte is ignored.

/// Upsample PCM16 from 8 kHz to 24 kHz (3x, linear interpolation).
///
/// For each consecutive pair `(cur, next)` the outputs are `cur`,
/// `(2·cur + next)/3` and `(cur + 2·next)/3`; the final input sample is
/// replicated three times. Output length is exactly three times the
/// whole-sample input length.
pub fn upsample_8k_to_24k(pcm8k: &[u8]) -> Vec<u8> {
    let samples: Vec<i16> = to_samples(pcm8k);
    if samples.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(samples.len() * 3 * 2);
    for window in samples.windows(2) {
        let cur = window[0] as i32;
        let next = window[1] as i32;
        push_sample(&mut out, window[0]);
        push_sample(&mut out, ((cur * 2 + next) / 3) as i16);
        push_sample(&mut out, ((cur + next * 2) / 3) as i16);
    }

    // No successor to interpolate against; hold the last sample.
    let last = samples[samples.len() - 1];
    for _ in 0..3 {
        push_sample(&mut out, last);
    }
    out
}

/// Downsample PCM16 from 24 kHz to 8 kHz (3x decimation by averaging).
///
/// Each output sample is the integer mean of three consecutive inputs;
/// trailing samples that do not complete a group are discarded.
pub fn downsample_24k_to_8k(pcm24k: &[u8]) -> Vec<u8> {
    let samples: Vec<i16> = to_samples(pcm24k);
    let groups = samples.len() / 3;
    let mut out = Vec::with_capacity(groups * 2);
    for group in samples.chunks_exact(3) {
        let mean = (group[0] as i32 + group[1] as i32 + group[2] as i32) / 3;
        push_sample(&mut out, mean as i16);
    }
    out
}

fn to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn push_sample(out: &mut Vec<u8>, sample: i16) {
    out.extend_from_slice(&sample.to_le_bytes());
}
