//! Streaming session: one ordered chunk stream driving playback and
//! persistence.
//!
//! Every in-order chunk is decoded once and handed first to the playback
//! scheduler, then to the container writer. Per-chunk faults are collected and
//! the session carries on; ordering and format faults end it. However a
//! session ends, the container is finalized with whatever was received.

use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Span};
use uuid::Uuid;

use crate::audio::{ContainerSummary, ContainerWriter, SessionFormat};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::playback::{
    PlaybackClock, PlaybackScheduler, PlaybackSink, SchedulerConfig, SchedulerStats,
};
use crate::stream::{Chunk, ChunkOutcome, ChunkReassembler, ReassemblerStats, StreamEvent};

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Explicit end marker
    Completed,
    /// Transport closed
    Closed,
    /// Upstream reported a timeout
    ServerTimeout,
    /// No chunk arrived within the configured interval
    TimedOut(Duration),
    /// Explicit stop by the caller
    Stopped,
    /// A fatal error
    Failed(String),
}

impl Termination {
    /// Whether buffers still held for preload get played
    fn plays_held_buffers(&self) -> bool {
        !matches!(self, Termination::Stopped | Termination::Failed(_))
    }
}

/// Whether the caller should keep feeding events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Summary of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub format: SessionFormat,
    pub termination: Termination,
    pub chunks: ReassemblerStats,
    pub playback: SchedulerStats,
    /// `None` when the container could not be finalized
    pub container: Option<ContainerSummary>,
    /// Recoverable faults, in the order they happened
    pub faults: Vec<Error>,
}

impl SessionReport {
    /// Duration of all decoded audio
    pub fn duration(&self) -> Duration {
        self.format
            .duration_of(self.chunks.samples_decoded as usize)
    }

    pub fn is_complete(&self) -> bool {
        self.termination == Termination::Completed
    }
}

/// One streaming session
pub struct StreamSession<C: PlaybackClock, S: PlaybackSink, W: Write + Seek = File> {
    id: Uuid,
    span: Span,
    format: SessionFormat,
    reassembler: ChunkReassembler,
    scheduler: PlaybackScheduler<C, S>,
    writer: ContainerWriter<W>,
    persistence_failed: bool,
    container: Option<ContainerSummary>,
    faults: Vec<Error>,
    closed: bool,
    report: Option<SessionReport>,
}

impl<C: PlaybackClock, S: PlaybackSink> StreamSession<C, S, File> {
    /// Session recording into a `.wav` file at `path`
    pub fn create(
        config: &StreamConfig,
        path: impl AsRef<Path>,
        clock: C,
        sink: S,
    ) -> Result<Self> {
        config.validate()?;
        let format = config.session_format()?;
        let writer = ContainerWriter::create(path, format)?;
        Ok(Self::new(format, SchedulerConfig::from(config), clock, sink, writer))
    }
}

impl<C: PlaybackClock, S: PlaybackSink, W: Write + Seek> StreamSession<C, S, W> {
    pub fn new(
        format: SessionFormat,
        scheduler_config: SchedulerConfig,
        clock: C,
        sink: S,
        writer: ContainerWriter<W>,
    ) -> Self {
        let id = Uuid::new_v4();
        let span = info_span!(
            "stream_session",
            id = %id,
            encoding = %format.encoding(),
            sample_rate = format.sample_rate()
        );
        span.in_scope(|| info!("Session opened"));

        Self {
            id,
            span,
            format,
            reassembler: ChunkReassembler::new(format.encoding()),
            scheduler: PlaybackScheduler::new(scheduler_config, format, clock, sink),
            writer,
            persistence_failed: false,
            container: None,
            faults: Vec::new(),
            closed: false,
            report: None,
        }
    }

    /// Process one chunk: decode, schedule, persist.
    ///
    /// Fatal errors close the session (flushing the container) before being
    /// returned; the report is then available from [`Self::take_report`].
    pub fn on_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.closed {
            return Err(Error::SessionClosed);
        }
        match self.reassembler.on_chunk(chunk) {
            Ok(outcome) => {
                self.forward(outcome);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Process one transport event. Chunks are numbered in arrival order.
    pub fn on_event(&mut self, event: StreamEvent) -> Result<Flow> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.closed {
            return Err(Error::SessionClosed);
        }
        let termination = match event {
            StreamEvent::Chunk { data } => {
                let index = self.reassembler.next_index();
                return match self.reassembler.on_encoded_chunk(index, &data) {
                    Ok(outcome) => {
                        self.forward(outcome);
                        Ok(Flow::Continue)
                    }
                    Err(e) => Err(self.fail(e)),
                };
            }
            StreamEvent::Other => return Ok(Flow::Continue),
            StreamEvent::Done => Termination::Completed,
            StreamEvent::Timeout => Termination::ServerTimeout,
            StreamEvent::Close => Termination::Closed,
        };
        self.close(termination);
        Ok(Flow::Finished)
    }

    fn forward(&mut self, outcome: ChunkOutcome) {
        let buffer = match outcome {
            ChunkOutcome::Decoded(buffer) => buffer,
            ChunkOutcome::Skipped(fault) => {
                self.faults.push(fault);
                return;
            }
        };
        if buffer.is_empty() {
            return;
        }

        if let Some(fault) = self.scheduler.submit(buffer.clone()) {
            self.faults.push(fault);
        }

        if self.persistence_failed {
            return;
        }
        if let Err(e) = self.writer.append(&buffer) {
            error!("Persistence disabled for this session: {}", e);
            self.persistence_failed = true;
            self.faults.push(e);
        }
    }

    /// Note a recoverable fault raised outside the session (e.g. by the
    /// transport)
    pub fn record_fault(&mut self, fault: Error) {
        warn!(parent: &self.span, "Session fault: {}", fault);
        self.faults.push(fault);
    }

    fn fail(&mut self, err: Error) -> Error {
        error!("Fatal session error: {}", err);
        self.close(Termination::Failed(err.to_string()));
        err
    }

    fn close(&mut self, termination: Termination) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reassembler.terminate();

        if termination.plays_held_buffers() {
            if let Some(fault) = self.scheduler.flush() {
                self.faults.push(fault);
            }
        } else {
            self.scheduler.discard();
        }

        match self.writer.finalize() {
            Ok(summary) => self.container = Some(summary),
            Err(e) => {
                error!("Failed to finalize session container: {}", e);
                self.faults.push(e);
            }
        }

        info!(
            "Session closed ({:?}): {} chunks, {:?} of audio, {} faults",
            termination,
            self.reassembler.stats().chunks_accepted,
            self.format
                .duration_of(self.reassembler.stats().samples_decoded as usize),
            self.faults.len()
        );

        self.report = Some(SessionReport {
            session_id: self.id,
            format: self.format,
            termination,
            chunks: self.reassembler.stats(),
            playback: self.scheduler.stats(),
            container: self.container,
            faults: std::mem::take(&mut self.faults),
        });
    }

    /// End the session and return its report. Fails if already closed.
    pub fn finish(&mut self, termination: Termination) -> Result<SessionReport> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.closed {
            return Err(Error::SessionClosed);
        }
        self.close(termination);
        self.take_report().ok_or(Error::SessionClosed)
    }

    /// Close after a failure observed outside the session. The report stays
    /// available from [`Self::take_report`].
    pub fn abort(&mut self, termination: Termination) {
        let span = self.span.clone();
        let _enter = span.enter();
        self.close(termination);
    }

    /// Cancel: discard queued playback, flush the container, refuse further
    /// chunks.
    pub fn stop(&mut self) -> Result<SessionReport> {
        self.finish(Termination::Stopped)
    }

    /// Report of a closed session, if not yet taken
    pub fn take_report(&mut self) -> Option<SessionReport> {
        self.report.take()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> SessionFormat {
        self.format
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<C, S> {
        &self.scheduler
    }

    pub fn sink(&self) -> &S {
        self.scheduler.sink()
    }

    pub fn container_writer(&self) -> &ContainerWriter<W> {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{encode, Encoding, WAV_HEADER_LEN};
    use crate::playback::{CollectingSink, ManualClock};
    use std::io::{self, Cursor, SeekFrom};

    type TestSession = StreamSession<ManualClock, CollectingSink, Cursor<Vec<u8>>>;

    fn session(encoding: Encoding, sample_rate: u32, preload: usize) -> (TestSession, ManualClock) {
        let format = SessionFormat::new(sample_rate, encoding).unwrap();
        let clock = ManualClock::new();
        let writer = ContainerWriter::new(Cursor::new(Vec::new()), format).unwrap();
        let session = StreamSession::new(
            format,
            SchedulerConfig {
                preload_buffers: preload,
            },
            clock.clone(),
            CollectingSink::new(),
            writer,
        );
        (session, clock)
    }

    /// Accepts `capacity` bytes, then fails every write
    struct FullDisk {
        capacity: usize,
        written: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written >= self.capacity {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.capacity - self.written);
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FullDisk {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(self.written as u64)
        }
    }

    fn file_bytes(session: &TestSession) -> Vec<u8> {
        session.container_writer().get_ref().get_ref().clone()
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_s16le_session_header_fields() {
        let (mut session, _clock) = session(Encoding::PcmS16le, 44100, 1);
        let samples: Vec<f32> = (0..300).map(|i| (i as f32 / 300.0) - 0.5).collect();
        for (i, piece) in samples.chunks(100).enumerate() {
            session
                .on_chunk(Chunk::new(i as u64, encode(piece, Encoding::PcmS16le)))
                .unwrap();
        }
        let report = session.finish(Termination::Completed).unwrap();

        let bytes = file_bytes(&session);
        assert_eq!(u32_at(&bytes, 40), 2 * 300);
        assert_eq!(u32_at(&bytes, 28), 88200);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 16);
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 1);
        assert_eq!(report.container.unwrap().sample_count, 300);
        assert_eq!(report.duration(), Duration::from_nanos(6_802_721));
        assert_eq!(session.sink().scheduled().len(), 3);
    }

    #[test]
    fn test_f32le_session_format_code() {
        let (mut session, _clock) = session(Encoding::PcmF32le, 24000, 1);
        session
            .on_chunk(Chunk::new(0, encode(&[0.1, 0.2], Encoding::PcmF32le)))
            .unwrap();
        session.finish(Termination::Completed).unwrap();

        let bytes = file_bytes(&session);
        assert_eq!(u16::from_le_bytes([bytes[20], bytes[21]]), 3);
        assert_eq!(u16::from_le_bytes([bytes[34], bytes[35]]), 32);
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 8);
    }

    #[test]
    fn test_gap_fails_session_but_keeps_prior_audio() {
        let (mut session, _clock) = session(Encoding::PcmS16le, 16000, 1);
        session.on_chunk(Chunk::new(0, vec![0u8; 20])).unwrap();
        session.on_chunk(Chunk::new(1, vec![0u8; 30])).unwrap();
        let err = session.on_chunk(Chunk::new(3, vec![0u8; 40])).unwrap_err();
        assert!(matches!(err, Error::OutOfOrderChunk { expected: 2, received: 3 }));
        assert!(session.is_closed());

        let report = session.take_report().unwrap();
        assert!(matches!(report.termination, Termination::Failed(_)));
        assert_eq!(report.container.unwrap().sample_count, 25);
        assert_eq!(u32_at(&file_bytes(&session), 40), 50);

        assert!(matches!(
            session.on_chunk(Chunk::new(2, vec![0u8; 2])),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_malformed_chunk_skipped_everywhere() {
        let (mut session, _clock) = session(Encoding::PcmS16le, 8000, 1);
        session.on_chunk(Chunk::new(0, vec![0u8; 16])).unwrap();
        session.on_chunk(Chunk::new(1, vec![0u8; 15])).unwrap();
        session.on_chunk(Chunk::new(2, vec![0u8; 16])).unwrap();
        let report = session.finish(Termination::Completed).unwrap();

        assert_eq!(report.chunks.chunks_skipped, 1);
        assert_eq!(report.container.unwrap().sample_count, 16);
        assert_eq!(session.sink().scheduled().len(), 2);
        assert!(matches!(
            report.faults[0],
            Error::MalformedPayload { chunk: 1, .. }
        ));
        // Timing continues from the last good buffer: no silence inserted
        let scheduled = session.sink().scheduled();
        assert_eq!(scheduled[1].start, scheduled[0].end());
    }

    #[test]
    fn test_wire_events_drive_session() {
        let (mut session, _clock) = session(Encoding::PcmMulaw, 8000, 3);
        assert_eq!(
            session
                .on_event(StreamEvent::Chunk {
                    data: "////".to_string()
                })
                .unwrap(),
            Flow::Continue
        );
        assert_eq!(session.on_event(StreamEvent::Other).unwrap(), Flow::Continue);
        assert!(session.sink().scheduled().is_empty());

        assert_eq!(session.on_event(StreamEvent::Done).unwrap(), Flow::Finished);
        assert_eq!(session.sink().scheduled().len(), 1);

        let report = session.take_report().unwrap();
        assert!(report.is_complete());
        assert_eq!(report.container.unwrap().sample_count, 3);
        assert!(matches!(
            session.on_event(StreamEvent::Done),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_stop_discards_held_playback_but_flushes_container() {
        let (mut session, _clock) = session(Encoding::PcmAlaw, 8000, 4);
        session.on_chunk(Chunk::new(0, vec![0xD5; 80])).unwrap();
        session.on_chunk(Chunk::new(1, vec![0xD5; 80])).unwrap();
        let report = session.stop().unwrap();

        assert_eq!(report.termination, Termination::Stopped);
        assert_eq!(report.playback.buffers_discarded, 2);
        assert!(session.sink().scheduled().is_empty());
        assert!(session.sink().was_cancelled());
        assert_eq!(report.container.unwrap().sample_count, 160);
        assert!(session.stop().is_err());
    }

    #[test]
    fn test_empty_chunk_is_a_no_op() {
        let (mut session, _clock) = session(Encoding::PcmS16le, 8000, 1);
        session.on_chunk(Chunk::new(0, vec![0u8; 16])).unwrap();
        let cursor = session.scheduler().cursor();
        session.on_chunk(Chunk::new(1, Vec::new())).unwrap();
        assert_eq!(session.scheduler().cursor(), cursor);
        session.on_chunk(Chunk::new(2, vec![0u8; 16])).unwrap();
        let report = session.finish(Termination::Completed).unwrap();
        assert_eq!(report.chunks.chunks_accepted, 3);
        assert_eq!(report.container.unwrap().sample_count, 16);
    }

    #[test]
    fn test_underrun_recorded_as_fault() {
        let (mut session, clock) = session(Encoding::PcmS16le, 8000, 1);
        session.on_chunk(Chunk::new(0, vec![0u8; 1600])).unwrap();
        clock.advance(Duration::from_millis(500));
        session.on_chunk(Chunk::new(1, vec![0u8; 1600])).unwrap();
        let report = session.finish(Termination::Closed).unwrap();
        assert_eq!(report.playback.underruns, 1);
        assert!(matches!(
            report.faults[0],
            Error::PlaybackUnderrun { chunk: 1, .. }
        ));
    }

    #[test]
    fn test_write_failure_disables_persistence_only() {
        let format = SessionFormat::new(8000, Encoding::PcmS16le).unwrap();
        let disk = FullDisk {
            capacity: WAV_HEADER_LEN,
            written: 0,
        };
        let writer = ContainerWriter::new(disk, format).unwrap();
        let mut session = StreamSession::new(
            format,
            SchedulerConfig { preload_buffers: 1 },
            ManualClock::new(),
            CollectingSink::new(),
            writer,
        );

        // Larger than the writer's internal buffer so every append reaches disk
        for i in 0..4 {
            session.on_chunk(Chunk::new(i, vec![0u8; 10_000])).unwrap();
        }
        let report = session.finish(Termination::Completed).unwrap();

        assert!(report.is_complete());
        assert_eq!(session.sink().scheduled().len(), 4);
        assert_eq!(report.playback.buffers_scheduled, 4);
        assert_eq!(report.chunks.chunks_accepted, 4);
        assert!(report
            .faults
            .iter()
            .any(|fault| matches!(fault, Error::ContainerWriteFailure(_))));
        assert!(report.container.is_none());
    }

    #[test]
    fn test_server_timeout_and_close_flush_like_done() {
        for (event, termination) in [
            (StreamEvent::Timeout, Termination::ServerTimeout),
            (StreamEvent::Close, Termination::Closed),
        ] {
            let (mut session, _clock) = session(Encoding::PcmS16le, 8000, 3);
            for data in ["AAAAAA==", "AAA="] {
                session
                    .on_event(StreamEvent::Chunk {
                        data: data.to_string(),
                    })
                    .unwrap();
            }
            assert!(session.sink().scheduled().is_empty());

            assert_eq!(session.on_event(event).unwrap(), Flow::Finished);
            assert_eq!(session.sink().scheduled().len(), 2);
            assert!(!session.sink().was_cancelled());
            assert!(session.container_writer().is_finalized());

            let report = session.take_report().unwrap();
            assert_eq!(report.termination, termination);
            assert_eq!(report.playback.buffers_discarded, 0);
            assert_eq!(report.container.unwrap().sample_count, 3);
            assert_eq!(u32_at(&file_bytes(&session), 40), 6);
        }
    }
}
