//! Gapless playback scheduler.
//!
//! The scheduler decides *when* each decoded buffer plays; the sink owns the
//! device. Timing lives in an explicit [`PlaybackCursor`]:
//! - each buffer starts at `max(now, next_start)`
//! - `next_start` then advances by the buffer's duration
//!
//! so consecutive buffers never overlap, play back-to-back while arrival keeps
//! pace, and start immediately (reported as an underrun) when they arrive late.
//! The first `preload_buffers` buffers are held until enough have queued to
//! absorb early jitter. Once released, playback is never held again.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use super::clock::PlaybackClock;
use super::sink::{PlaybackSink, ScheduledBuffer};
use crate::audio::{samples_to_duration, DecodedBuffer, SessionFormat};
use crate::config::StreamConfig;
use crate::error::Error;

/// Configuration for the playback scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Buffers to hold before the first output (at least 1)
    pub preload_buffers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { preload_buffers: 3 }
    }
}

impl From<&StreamConfig> for SchedulerConfig {
    fn from(config: &StreamConfig) -> Self {
        Self {
            preload_buffers: config.preload_buffers,
        }
    }
}

/// Where the next buffer may start on the playback clock.
///
/// Positions are kept as a sample count from the start of the current
/// contiguous run and converted to time once per placement, so rounding never
/// accumulates across buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCursor {
    sample_rate: u32,
    run: Option<Run>,
}

/// A stretch of back-to-back playback starting at `anchor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    anchor: Duration,
    samples: u64,
}

impl Run {
    fn at(&self, samples: u64, sample_rate: u32) -> Duration {
        self.anchor + samples_to_duration(samples, sample_rate)
    }
}

/// Result of placing one buffer on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub start: Duration,
    /// Span up to the next buffer's start
    pub duration: Duration,
    /// How far behind the cursor the clock already was, if the buffer is late
    pub late_by: Option<Duration>,
}

impl PlaybackCursor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            run: None,
        }
    }

    /// `None` until the first buffer has been placed
    pub fn next_start(&self) -> Option<Duration> {
        self.run.map(|run| run.at(run.samples, self.sample_rate))
    }

    /// Place a buffer of `sample_count` samples given the clock reading `now`.
    pub fn place(&mut self, now: Duration, sample_count: usize) -> Placement {
        let late_by = self
            .next_start()
            .filter(|next| now > *next)
            .map(|next| now - next);
        let run = match self.run {
            Some(run) if late_by.is_none() => run,
            _ => Run {
                anchor: now,
                samples: 0,
            },
        };

        let start = run.at(run.samples, self.sample_rate);
        let run = Run {
            samples: run.samples + sample_count as u64,
            ..run
        };
        let end = run.at(run.samples, self.sample_rate);
        self.run = Some(run);

        Placement {
            start,
            duration: end - start,
            late_by,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub buffers_scheduled: usize,
    pub samples_scheduled: u64,
    pub underruns: usize,
    pub buffers_discarded: usize,
}

/// Gapless scheduler for one session
pub struct PlaybackScheduler<C: PlaybackClock, S: PlaybackSink> {
    config: SchedulerConfig,
    clock: C,
    sink: S,
    cursor: PlaybackCursor,
    pending: VecDeque<DecodedBuffer>,
    started: bool,
    stats: SchedulerStats,
}

impl<C: PlaybackClock, S: PlaybackSink> PlaybackScheduler<C, S> {
    pub fn new(config: SchedulerConfig, format: SessionFormat, clock: C, sink: S) -> Self {
        let config = SchedulerConfig {
            preload_buffers: config.preload_buffers.max(1),
        };
        Self {
            config,
            clock,
            sink,
            cursor: PlaybackCursor::new(format.sample_rate()),
            pending: VecDeque::new(),
            started: false,
            stats: SchedulerStats::default(),
        }
    }

    /// Queue a buffer for output.
    ///
    /// Returns the underrun fault if releasing it had to start late. Empty
    /// buffers are ignored and never move the cursor.
    pub fn submit(&mut self, buffer: DecodedBuffer) -> Option<Error> {
        if buffer.is_empty() {
            return None;
        }

        self.pending.push_back(buffer);
        if !self.started && self.pending.len() < self.config.preload_buffers {
            debug!(
                "Preloading: {}/{} buffers queued",
                self.pending.len(),
                self.config.preload_buffers
            );
            return None;
        }

        self.release()
    }

    /// Release held buffers regardless of the preload threshold. Called when
    /// the stream completes before the threshold was reached.
    pub fn flush(&mut self) -> Option<Error> {
        if self.pending.is_empty() {
            return None;
        }
        self.release()
    }

    /// Drop held buffers and tell the sink to cancel. Returns how many were
    /// dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.stats.buffers_discarded += dropped;
        self.sink.cancel();
        if dropped > 0 {
            debug!("Discarded {} queued playback buffers", dropped);
        }
        dropped
    }

    fn release(&mut self) -> Option<Error> {
        self.started = true;
        let mut fault = None;
        while let Some(buffer) = self.pending.pop_front() {
            let placement = self.cursor.place(self.clock.now(), buffer.len());

            if let Some(late_by) = placement.late_by {
                self.stats.underruns += 1;
                warn!(
                    "Playback underrun: chunk {} arrived {:?} after the previous buffer ended",
                    buffer.origin_chunk(),
                    late_by
                );
                fault.get_or_insert(Error::PlaybackUnderrun {
                    chunk: buffer.origin_chunk(),
                    late_by,
                });
            }

            self.stats.buffers_scheduled += 1;
            self.stats.samples_scheduled += buffer.len() as u64;
            self.sink.schedule(ScheduledBuffer {
                buffer,
                start: placement.start,
                duration: placement.duration,
            });
        }
        fault
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Encoding;
    use crate::playback::{CollectingSink, ManualClock};

    fn scheduler(preload: usize) -> (PlaybackScheduler<ManualClock, CollectingSink>, ManualClock) {
        let clock = ManualClock::new();
        let format = SessionFormat::new(8000, Encoding::PcmS16le).unwrap();
        let scheduler = PlaybackScheduler::new(
            SchedulerConfig {
                preload_buffers: preload,
            },
            format,
            clock.clone(),
            CollectingSink::new(),
        );
        (scheduler, clock)
    }

    fn buffer(samples: usize, chunk: u64) -> DecodedBuffer {
        DecodedBuffer::new(vec![0.1; samples], chunk)
    }

    #[test]
    fn test_scheduler_creation() {
        let (scheduler, _) = scheduler(3);
        assert!(!scheduler.is_started());
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(scheduler.cursor().next_start(), None);
    }

    #[test]
    fn test_cursor_places_back_to_back() {
        let mut cursor = PlaybackCursor::new(8000);
        let first = cursor.place(Duration::from_millis(5), 800);
        let second = cursor.place(Duration::from_millis(20), 400);
        assert_eq!(first.start, Duration::from_millis(5));
        assert_eq!(second.start, Duration::from_millis(105));
        assert_eq!(second.late_by, None);
        assert_eq!(cursor.next_start(), Some(Duration::from_millis(155)));
    }

    #[test]
    fn test_cursor_starts_late_buffers_immediately() {
        let mut cursor = PlaybackCursor::new(8000);
        cursor.place(Duration::ZERO, 800);
        let late = cursor.place(Duration::from_millis(130), 800);
        assert_eq!(late.start, Duration::from_millis(130));
        assert_eq!(late.late_by, Some(Duration::from_millis(30)));
        assert_eq!(cursor.next_start(), Some(Duration::from_millis(230)));
    }

    #[test]
    fn test_cursor_does_not_drift_over_many_buffers() {
        // 100 samples at 44.1 kHz is not a whole number of nanoseconds
        let mut cursor = PlaybackCursor::new(44100);
        let mut previous_end = None;
        for i in 0..1000u64 {
            let placement = cursor.place(Duration::ZERO, 100);
            assert_eq!(placement.start, samples_to_duration(i * 100, 44100));
            if let Some(end) = previous_end {
                assert_eq!(placement.start, end);
            }
            previous_end = Some(placement.start + placement.duration);
        }
        assert_eq!(
            cursor.next_start(),
            Some(Duration::from_nanos(2_267_573_696))
        );
    }

    #[test]
    fn test_preload_holds_until_threshold() {
        let (mut scheduler, clock) = scheduler(3);
        clock.set(Duration::from_millis(10));
        assert!(scheduler.submit(buffer(800, 0)).is_none());
        assert!(scheduler.submit(buffer(800, 1)).is_none());
        assert!(scheduler.sink().scheduled().is_empty());

        clock.set(Duration::from_millis(40));
        scheduler.submit(buffer(800, 2));
        let starts: Vec<_> = scheduler.sink().scheduled().iter().map(|s| s.start).collect();
        assert_eq!(
            starts,
            vec![
                Duration::from_millis(40),
                Duration::from_millis(140),
                Duration::from_millis(240)
            ]
        );
        assert!(scheduler.is_started());
    }

    #[test]
    fn test_started_playback_is_never_held_again() {
        let (mut scheduler, _clock) = scheduler(2);
        scheduler.submit(buffer(80, 0));
        scheduler.submit(buffer(80, 1));
        scheduler.submit(buffer(80, 2));
        assert_eq!(scheduler.sink().scheduled().len(), 3);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[test]
    fn test_intervals_never_overlap_under_jitter() {
        let (mut scheduler, clock) = scheduler(1);
        let arrivals_ms = [0u64, 30, 35, 300, 310, 900, 905, 906];
        for (i, at) in arrivals_ms.iter().enumerate() {
            clock.set(Duration::from_millis(*at));
            scheduler.submit(buffer(400 + i * 37, i as u64));
        }

        let scheduled = scheduler.sink().scheduled();
        assert_eq!(scheduled.len(), arrivals_ms.len());
        for pair in scheduled.windows(2) {
            assert!(pair[1].start >= pair[0].start);
            assert!(pair[1].start >= pair[0].end());
        }
    }

    #[test]
    fn test_underrun_is_reported_not_padded() {
        let (mut scheduler, clock) = scheduler(1);
        scheduler.submit(buffer(800, 0));
        clock.set(Duration::from_millis(250));
        let fault = scheduler.submit(buffer(800, 1));
        assert!(matches!(
            fault,
            Some(Error::PlaybackUnderrun { chunk: 1, late_by }) if late_by == Duration::from_millis(150)
        ));
        assert_eq!(scheduler.stats().underruns, 1);
        assert_eq!(
            scheduler.sink().scheduled()[1].start,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_empty_buffer_does_not_advance_cursor() {
        let (mut scheduler, _clock) = scheduler(1);
        scheduler.submit(buffer(800, 0));
        let before = scheduler.cursor();
        assert!(scheduler.submit(buffer(0, 1)).is_none());
        assert_eq!(scheduler.cursor(), before);
        assert_eq!(scheduler.sink().scheduled().len(), 1);
    }

    #[test]
    fn test_flush_releases_short_streams() {
        let (mut scheduler, _clock) = scheduler(5);
        scheduler.submit(buffer(80, 0));
        scheduler.submit(buffer(80, 1));
        assert!(scheduler.sink().scheduled().is_empty());
        scheduler.flush();
        assert_eq!(scheduler.sink().scheduled().len(), 2);
    }

    #[test]
    fn test_discard_drops_pending_and_cancels_sink() {
        let (mut scheduler, _clock) = scheduler(4);
        scheduler.submit(buffer(80, 0));
        scheduler.submit(buffer(80, 1));
        assert_eq!(scheduler.discard(), 2);
        assert!(scheduler.sink().was_cancelled());
        assert!(scheduler.sink().scheduled().is_empty());
        assert_eq!(scheduler.stats().buffers_discarded, 2);
    }

    #[test]
    fn test_zero_preload_is_treated_as_one() {
        let (mut scheduler, _clock) = scheduler(0);
        scheduler.submit(buffer(80, 0));
        assert_eq!(scheduler.sink().scheduled().len(), 1);
    }
}
