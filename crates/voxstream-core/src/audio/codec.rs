//! Sample codec for the PCM-family stream encodings
//!
//! Decoding turns one opaque chunk payload into normalized `f32` samples in
//! `[-1.0, 1.0]`. Encoding is the inverse and is used when re-serializing a
//! session into its container. μ-law and A-law follow ITU-T G.711 exactly, so
//! every companded byte survives a decode/encode pass unchanged (except μ-law
//! negative zero, which folds onto positive zero).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::format::{Encoding, SessionFormat};

/// Full-scale divisor used to normalize 16-bit linear samples
const FULL_SCALE: f32 = 32768.0;

/// μ-law bias added before segment search
const MULAW_BIAS: i32 = 0x84;

/// Upper bound of each μ-law segment, biased 16-bit domain
const MULAW_SEGMENT_END: [i32; 8] = [0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF, 0x3FFF, 0x7FFF];

/// Upper bound of each A-law segment, 13-bit domain
const ALAW_SEGMENT_END: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];

/// A payload that cannot be split into whole samples
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{len} byte payload is not a multiple of the {width} byte sample width ({trailing} trailing byte(s) discarded)")]
    PartialSample {
        len: usize,
        width: usize,
        trailing: usize,
    },
}

/// Decoded samples from one chunk. Cloning shares the sample storage.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBuffer {
    samples: Arc<[f32]>,
    origin_chunk: u64,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, origin_chunk: u64) -> Self {
        Self {
            samples: samples.into(),
            origin_chunk,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sequence index of the chunk these samples came from
    pub fn origin_chunk(&self) -> u64 {
        self.origin_chunk
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self, format: &SessionFormat) -> Duration {
        format.duration_of(self.samples.len())
    }
}

/// Decode one chunk payload into normalized samples.
pub fn decode(payload: &[u8], encoding: Encoding) -> Result<Vec<f32>, PayloadError> {
    let width = encoding.bytes_per_sample();
    let trailing = payload.len() % width;
    if trailing != 0 {
        return Err(PayloadError::PartialSample {
            len: payload.len(),
            width,
            trailing,
        });
    }

    let samples = match encoding {
        Encoding::PcmS16le => payload
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / FULL_SCALE)
            .collect(),
        Encoding::PcmF32le => payload
            .chunks_exact(4)
            .map(|b| normalize_float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect(),
        Encoding::PcmMulaw => payload
            .iter()
            .map(|&b| mulaw_to_linear(b) as f32 / FULL_SCALE)
            .collect(),
        Encoding::PcmAlaw => payload
            .iter()
            .map(|&b| alaw_to_linear(b) as f32 / FULL_SCALE)
            .collect(),
    };
    Ok(samples)
}

/// Encode normalized samples back into `encoding`'s byte representation,
/// appending to `out`.
pub fn encode_into(samples: &[f32], encoding: Encoding, out: &mut Vec<u8>) {
    out.reserve(samples.len() * encoding.bytes_per_sample());
    match encoding {
        Encoding::PcmS16le => {
            for &sample in samples {
                out.extend_from_slice(&to_linear(sample).to_le_bytes());
            }
        }
        Encoding::PcmF32le => {
            for &sample in samples {
                out.extend_from_slice(&normalize_float(sample).to_le_bytes());
            }
        }
        Encoding::PcmMulaw => out.extend(samples.iter().map(|&s| linear_to_mulaw(to_linear(s)))),
        Encoding::PcmAlaw => out.extend(samples.iter().map(|&s| linear_to_alaw(to_linear(s)))),
    }
}

/// Encode normalized samples into a fresh byte vector
pub fn encode(samples: &[f32], encoding: Encoding) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * encoding.bytes_per_sample());
    encode_into(samples, encoding, &mut bytes);
    bytes
}

/// Clamp upstream overshoot; NaN carries no signal and becomes silence.
fn normalize_float(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}

/// Normalized float to 16-bit linear, rounding to the nearest step
fn to_linear(sample: f32) -> i16 {
    (normalize_float(sample) * FULL_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// G.711 μ-law expansion to 16-bit linear
pub fn mulaw_to_linear(byte: u8) -> i16 {
    let u = !byte as i32;
    let mut t = ((u & 0x0F) << 3) + MULAW_BIAS;
    t <<= (u & 0x70) >> 4;
    let value = if u & 0x80 != 0 {
        MULAW_BIAS - t
    } else {
        t - MULAW_BIAS
    };
    value as i16
}

/// G.711 μ-law compression from 16-bit linear
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let (magnitude, mask) = if sample < 0 {
        (MULAW_BIAS - sample as i32, 0x7F)
    } else {
        (sample as i32 + MULAW_BIAS, 0xFF)
    };

    match segment(magnitude, &MULAW_SEGMENT_END) {
        Some(seg) => {
            let uval = ((seg as i32) << 4) | ((magnitude >> (seg + 3)) & 0x0F);
            (uval ^ mask) as u8
        }
        None => (0x7F ^ mask) as u8,
    }
}

/// G.711 A-law expansion to 16-bit linear
pub fn alaw_to_linear(byte: u8) -> i16 {
    let a = (byte ^ 0x55) as i32;
    let mut t = (a & 0x0F) << 4;
    let seg = (a & 0x70) >> 4;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & 0x80 != 0 {
        t as i16
    } else {
        -t as i16
    }
}

/// G.711 A-law compression from 16-bit linear
pub fn linear_to_alaw(sample: i16) -> u8 {
    let shifted = (sample as i32) >> 3;
    let (magnitude, mask) = if shifted >= 0 {
        (shifted, 0xD5)
    } else {
        (-shifted - 1, 0x55)
    };

    match segment(magnitude, &ALAW_SEGMENT_END) {
        Some(seg) => {
            let mut aval = (seg as i32) << 4;
            if seg < 2 {
                aval |= (magnitude >> 1) & 0x0F;
            } else {
                aval |= (magnitude >> seg) & 0x0F;
            }
            (aval ^ mask) as u8
        }
        None => (0x7F ^ mask) as u8,
    }
}

fn segment(value: i32, ends: &[i32; 8]) -> Option<usize> {
    ends.iter().position(|&end| value <= end)
}
