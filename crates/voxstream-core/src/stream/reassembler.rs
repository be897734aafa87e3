//! Chunk reassembly: ordering checks and per-chunk decoding

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::audio::{decode, DecodedBuffer, Encoding};
use crate::error::{Error, Result};

/// One encoded fragment as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence_index: u64,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(sequence_index: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_index,
            payload: payload.into(),
        }
    }
}

/// What became of an in-order chunk
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Decoded and ready for the downstream consumers
    Decoded(DecodedBuffer),
    /// Payload was malformed; its samples are dropped
    Skipped(Error),
}

/// Reassembler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    pub chunks_accepted: u64,
    pub chunks_skipped: u64,
    pub bytes_received: u64,
    pub samples_decoded: u64,
}

/// Enforces strict chunk ordering and decodes each payload.
///
/// Ordering violations are fatal: once one is seen every later chunk is
/// refused with [`Error::SessionClosed`].
pub struct ChunkReassembler {
    encoding: Encoding,
    next_index: u64,
    terminated: bool,
    stats: ReassemblerStats,
}

impl ChunkReassembler {
    pub fn new(encoding: Encoding) -> Self {
        Self::starting_at(encoding, 0)
    }

    /// Reassembler whose first expected sequence index is `first_index`
    pub fn starting_at(encoding: Encoding, first_index: u64) -> Self {
        Self {
            encoding,
            next_index: first_index,
            terminated: false,
            stats: ReassemblerStats::default(),
        }
    }

    /// Accept a raw chunk
    pub fn on_chunk(&mut self, chunk: Chunk) -> Result<ChunkOutcome> {
        self.admit(chunk.sequence_index)?;
        Ok(self.decode_payload(chunk.sequence_index, &chunk.payload))
    }

    /// Accept a chunk whose payload is still base64 text, as it arrives on
    /// the wire. Bad base64 is a malformed payload, not an ordering fault.
    pub fn on_encoded_chunk(&mut self, sequence_index: u64, data: &str) -> Result<ChunkOutcome> {
        self.admit(sequence_index)?;
        match general_purpose::STANDARD.decode(data.trim()) {
            Ok(payload) => Ok(self.decode_payload(sequence_index, &payload)),
            Err(e) => Ok(self.skip(Error::MalformedPayload {
                chunk: sequence_index,
                reason: format!("invalid base64: {}", e),
            })),
        }
    }

    fn admit(&mut self, sequence_index: u64) -> Result<()> {
        if self.terminated {
            return Err(Error::SessionClosed);
        }
        if sequence_index != self.next_index {
            self.terminated = true;
            error!(
                "Chunk {} arrived while expecting {}; terminating session",
                sequence_index, self.next_index
            );
            return Err(Error::OutOfOrderChunk {
                expected: self.next_index,
                received: sequence_index,
            });
        }
        self.next_index += 1;
        self.stats.chunks_accepted += 1;
        Ok(())
    }

    fn decode_payload(&mut self, sequence_index: u64, payload: &[u8]) -> ChunkOutcome {
        self.stats.bytes_received += payload.len() as u64;
        match decode(payload, self.encoding) {
            Ok(samples) => {
                debug!(
                    "Chunk {}: {} bytes -> {} samples",
                    sequence_index,
                    payload.len(),
                    samples.len()
                );
                self.stats.samples_decoded += samples.len() as u64;
                ChunkOutcome::Decoded(DecodedBuffer::new(samples, sequence_index))
            }
            Err(e) => self.skip(Error::MalformedPayload {
                chunk: sequence_index,
                reason: e.to_string(),
            }),
        }
    }

    fn skip(&mut self, fault: Error) -> ChunkOutcome {
        warn!("Dropping chunk: {}", fault);
        self.stats.chunks_skipped += 1;
        ChunkOutcome::Skipped(fault)
    }

    /// Sequence index the next chunk must carry
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Refuse all further chunks
    pub fn terminate(&mut self) {
        self.terminated = true;
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }
}
