//! RIFF/WAVE container writer
//!
//! Samples are appended to the destination as they arrive behind a
//! placeholder header; `finalize` seeks back and patches the two size fields.
//! The resulting bytes are identical to writing the whole session at once.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::codec::{encode_into, DecodedBuffer};
use super::format::SessionFormat;
use crate::error::{Error, Result};

/// Size of the canonical header written before the sample data
pub const WAV_HEADER_LEN: usize = 44;

/// Offset of the RIFF chunk size field
const RIFF_SIZE_OFFSET: u64 = 4;
/// Offset of the data chunk size field
const DATA_SIZE_OFFSET: u64 = 40;

/// Largest data chunk whose RIFF size still fits in 32 bits
const MAX_DATA_SIZE: u64 = u32::MAX as u64 - 36;

/// Build the 44-byte header for `data_size` bytes of sample data. The RIFF
/// size saturates for data sizes past the 32-bit limit.
pub fn wav_header(format: &SessionFormat, data_size: u32) -> [u8; WAV_HEADER_LEN] {
    let encoding = format.encoding();
    let mut out = [0u8; WAV_HEADER_LEN];
    let mut pos = 0;
    let mut put = |bytes: &[u8]| {
        out[pos..pos + bytes.len()].copy_from_slice(bytes);
        pos += bytes.len();
    };

    // RIFF header
    put(b"RIFF");
    put(&data_size.saturating_add(36).to_le_bytes());
    put(b"WAVE");

    // fmt chunk
    put(b"fmt ");
    put(&16u32.to_le_bytes());
    put(&encoding.format_code().to_le_bytes());
    put(&format.channel_count().to_le_bytes());
    put(&format.sample_rate().to_le_bytes());
    put(&format.byte_rate().to_le_bytes());
    put(&format.block_align().to_le_bytes());
    put(&encoding.bits_per_sample().to_le_bytes());

    // data chunk
    put(b"data");
    put(&data_size.to_le_bytes());

    out
}

/// What ended up in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerSummary {
    pub sample_count: u64,
    pub data_size: u32,
    pub duration: Duration,
}

/// Incremental WAV writer for one session
pub struct ContainerWriter<W: Write + Seek> {
    out: BufWriter<W>,
    format: SessionFormat,
    sample_count: u64,
    data_size: u64,
    scratch: Vec<u8>,
    finalized: bool,
}

impl ContainerWriter<File> {
    /// Create (or truncate) a `.wav` file at `path`
    pub fn create(path: impl AsRef<Path>, format: SessionFormat) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_failure)?;
        }
        let file = File::create(path).map_err(write_failure)?;
        info!("Writing session audio to {:?}", path);
        Self::new(file, format)
    }
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start a container on any seekable destination
    pub fn new(inner: W, format: SessionFormat) -> Result<Self> {
        let mut out = BufWriter::new(inner);
        out.write_all(&wav_header(&format, 0))
            .map_err(write_failure)?;
        Ok(Self {
            out,
            format,
            sample_count: 0,
            data_size: 0,
            scratch: Vec::new(),
            finalized: false,
        })
    }

    /// Append one buffer, re-encoded in the session's own sample format
    pub fn append(&mut self, buffer: &DecodedBuffer) -> Result<()> {
        if self.finalized {
            return Err(Error::ContainerWriteFailure(
                "container already finalized".to_string(),
            ));
        }
        if buffer.is_empty() {
            return Ok(());
        }

        self.scratch.clear();
        encode_into(buffer.samples(), self.format.encoding(), &mut self.scratch);

        let new_size = self.data_size + self.scratch.len() as u64;
        if new_size > MAX_DATA_SIZE {
            return Err(Error::ContainerWriteFailure(format!(
                "data chunk would exceed {} bytes",
                MAX_DATA_SIZE
            )));
        }

        self.out.write_all(&self.scratch).map_err(write_failure)?;
        self.data_size = new_size;
        self.sample_count += buffer.len() as u64;
        Ok(())
    }

    /// Patch the header sizes and flush. Succeeds at most once.
    pub fn finalize(&mut self) -> Result<ContainerSummary> {
        if self.finalized {
            return Err(Error::ContainerWriteFailure(
                "container already finalized".to_string(),
            ));
        }
        self.finalized = true;

        // Bounded by MAX_DATA_SIZE in append
        let data_size = self.data_size as u32;
        self.patch_sizes(data_size).map_err(write_failure)?;

        let summary = self.summary();
        debug!(
            "Finalized WAV container: {} samples, {} data bytes",
            summary.sample_count, summary.data_size
        );
        Ok(summary)
    }

    fn patch_sizes(&mut self, data_size: u32) -> std::io::Result<()> {
        self.out.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.out.write_all(&(36 + data_size).to_le_bytes())?;
        self.out.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.out.write_all(&data_size.to_le_bytes())?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()
    }

    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            sample_count: self.sample_count,
            data_size: self.data_size as u32,
            duration: self.format.duration_of(self.sample_count as usize),
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn get_ref(&self) -> &W {
        self.out.get_ref()
    }
}

impl<W: Write + Seek> Drop for ContainerWriter<W> {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.finalize() {
                warn!("Failed to finalize WAV container on drop: {}", e);
            }
        }
    }
}

fn write_failure(e: std::io::Error) -> Error {
    Error::ContainerWriteFailure(e.to_string())
}
