//! Playback sinks: where scheduled buffers are handed to an output device

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::audio::DecodedBuffer;

/// A buffer together with the instant it must start playing
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub buffer: DecodedBuffer,
    /// Start instant on the scheduler's playback clock
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledBuffer {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Output capability: "play these samples starting at instant T".
pub trait PlaybackSink {
    fn schedule(&mut self, scheduled: ScheduledBuffer);

    /// Drop anything the sink has queued but not yet played.
    fn cancel(&mut self) {}
}

/// Keeps every scheduled buffer in memory. Useful for offline replays.
#[derive(Debug, Default)]
pub struct CollectingSink {
    scheduled: Vec<ScheduledBuffer>,
    cancelled: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> &[ScheduledBuffer] {
        &self.scheduled
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Total scheduled playback time
    pub fn total_duration(&self) -> Duration {
        self.scheduled.iter().map(|s| s.duration).sum()
    }
}

impl PlaybackSink for CollectingSink {
    fn schedule(&mut self, scheduled: ScheduledBuffer) {
        self.scheduled.push(scheduled);
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// Commands delivered to an output task
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Play(ScheduledBuffer),
    Cancel,
}

/// Forwards scheduled buffers to an output device task over a channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PlaybackCommand>,
    closed: bool,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlaybackCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, closed: false }, rx)
    }

    fn send(&mut self, command: PlaybackCommand) {
        if self.tx.send(command).is_err() && !self.closed {
            warn!("Playback output task has gone away; dropping scheduled audio");
            self.closed = true;
        }
    }
}

impl PlaybackSink for ChannelSink {
    fn schedule(&mut self, scheduled: ScheduledBuffer) {
        self.send(PlaybackCommand::Play(scheduled));
    }

    fn cancel(&mut self) {
        self.send(PlaybackCommand::Cancel);
    }
}
