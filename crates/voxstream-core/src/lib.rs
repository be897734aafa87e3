//! Voxstream Core - streamed speech audio, played gaplessly and recorded
//!
//! This crate takes the chunked PCM-family audio a speech synthesizer pushes
//! over a server-push channel and turns it into two side effects:
//! - sample-accurate, gapless real-time playback scheduling
//! - one WAV file per session, written incrementally and finalized once
//!
//! # Architecture
//!
//! ```text
//! transport events -> StreamSession -> ChunkReassembler -> decode
//!                                   -> PlaybackScheduler -> PlaybackSink
//!                                   -> ContainerWriter   -> .wav
//! ```
//!
//! # Example
//!
//! ```ignore
//! use voxstream_core::{drive, event_stream, CollectingSink, DriverOptions,
//!     MonotonicClock, StopSignal, StreamConfig, StreamSession};
//!
//! let config = StreamConfig::default();
//! let mut session = StreamSession::create(&config, "out.wav", MonotonicClock::new(), CollectingSink::new())?;
//! let events = event_stream(tokio::io::stdin());
//! let report = drive(&mut session, events, &DriverOptions::from(&config), StopSignal::never()).await?;
//! ```

pub mod audio;
pub mod config;
pub mod driver;
pub mod error;
pub mod playback;
pub mod session;
pub mod stream;

pub use audio::{ContainerWriter, DecodedBuffer, Encoding, SessionFormat};
pub use config::StreamConfig;
pub use driver::{drive, stop_channel, DriverOptions, StopHandle, StopSignal};
pub use error::{Error, Result};
pub use playback::{
    ChannelSink, CollectingSink, ManualClock, MonotonicClock, PlaybackClock, PlaybackCursor,
    PlaybackScheduler, PlaybackSink, ScheduledBuffer,
};
pub use session::{Flow, SessionReport, StreamSession, Termination};
pub use stream::{event_stream, Chunk, ChunkReassembler, EventStreamDecoder, StreamEvent};
