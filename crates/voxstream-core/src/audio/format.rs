//! Session audio parameters: the closed set of PCM-family encodings and the
//! sample rates a stream may be produced at.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Sample rates the upstream synthesizer can produce.
pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [8000, 16000, 22050, 24000, 44100, 48000];

/// Raw PCM-family encodings carried by stream chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encoding {
    /// Signed 16-bit little-endian integers
    PcmS16le,
    /// IEEE-754 single precision little-endian floats
    PcmF32le,
    /// G.711 μ-law, one byte per sample
    PcmMulaw,
    /// G.711 A-law, one byte per sample
    PcmAlaw,
}

impl Encoding {
    pub const ALL: [Encoding; 4] = [
        Encoding::PcmS16le,
        Encoding::PcmF32le,
        Encoding::PcmMulaw,
        Encoding::PcmAlaw,
    ];

    /// Wire name, as used in session parameters
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::PcmS16le => "pcm_s16le",
            Encoding::PcmF32le => "pcm_f32le",
            Encoding::PcmMulaw => "pcm_mulaw",
            Encoding::PcmAlaw => "pcm_alaw",
        }
    }

    /// WAVE `fmt ` audio format code
    pub fn format_code(self) -> u16 {
        match self {
            Encoding::PcmS16le => 1,
            Encoding::PcmF32le => 3,
            Encoding::PcmAlaw => 6,
            Encoding::PcmMulaw => 7,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        match self {
            Encoding::PcmS16le => 16,
            Encoding::PcmF32le => 32,
            Encoding::PcmMulaw | Encoding::PcmAlaw => 8,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bits_per_sample() as usize / 8
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Encoding::ALL
            .into_iter()
            .find(|encoding| encoding.as_str() == s)
            .ok_or_else(|| Error::UnsupportedEncoding(s.to_string()))
    }
}

impl TryFrom<String> for Encoding {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Encoding> for String {
    fn from(encoding: Encoding) -> Self {
        encoding.as_str().to_string()
    }
}

/// Immutable parameters of one streaming session. Always mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionFormat {
    sample_rate: u32,
    encoding: Encoding,
}

impl SessionFormat {
    pub const CHANNEL_COUNT: u16 = 1;

    /// Validate and build session parameters
    pub fn new(sample_rate: u32, encoding: Encoding) -> Result<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(Error::UnsupportedSampleRate(sample_rate));
        }
        Ok(Self {
            sample_rate,
            encoding,
        })
    }

    /// Parse from the string form used by transports
    pub fn parse(sample_rate: u32, encoding: &str) -> Result<Self> {
        Self::new(sample_rate, encoding.parse()?)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn channel_count(&self) -> u16 {
        Self::CHANNEL_COUNT
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * Self::CHANNEL_COUNT as u32 * self.encoding.bytes_per_sample() as u32
    }

    pub fn block_align(&self) -> u16 {
        Self::CHANNEL_COUNT * (self.encoding.bits_per_sample() / 8)
    }

    /// Playback duration of `sample_count` mono samples
    pub fn duration_of(&self, sample_count: usize) -> Duration {
        samples_to_duration(sample_count as u64, self.sample_rate)
    }
}

/// Exact duration of `samples` at `sample_rate`, truncated to the nanosecond.
pub(crate) fn samples_to_duration(samples: u64, sample_rate: u32) -> Duration {
    let nanos = u128::from(samples) * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(nanos as u64)
}
