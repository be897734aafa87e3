//! Inbound side: transport events and chunk reassembly

mod events;
mod reassembler;

pub use events::{event_stream, EventStreamDecoder, StreamEvent};
pub use reassembler::{Chunk, ChunkOutcome, ChunkReassembler, ReassemblerStats};
