//! Configuration types for voxstream sessions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::{Encoding, SessionFormat};
use crate::error::{Error, Result};

/// Session and pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate the stream is produced at
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Encoding of every chunk payload
    #[serde(default = "default_encoding")]
    pub encoding: Encoding,

    /// Buffers held before playback starts
    #[serde(default = "default_preload_buffers")]
    pub preload_buffers: usize,

    /// Longest wait for the next chunk before the session times out
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    /// Directory for finished recordings
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            encoding: default_encoding(),
            preload_buffers: default_preload_buffers(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            output_dir: default_output_dir(),
        }
    }
}

impl StreamConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.preload_buffers == 0 {
            return Err(Error::ConfigError(
                "preload_buffers must be at least 1".to_string(),
            ));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "chunk_timeout_ms must be positive".to_string(),
            ));
        }
        self.session_format().map(|_| ())
    }

    pub fn session_format(&self) -> Result<SessionFormat> {
        SessionFormat::new(self.sample_rate, self.encoding)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_encoding() -> Encoding {
    Encoding::PcmS16le
}

fn default_preload_buffers() -> usize {
    3
}

fn default_chunk_timeout_ms() -> u64 {
    30_000
}

fn default_output_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxstream")
        .join("recordings")
}
