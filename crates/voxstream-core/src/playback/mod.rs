//! Real-time playback path: clocks, sinks and the gapless scheduler

mod clock;
mod scheduler;
mod sink;

pub use clock::{ManualClock, MonotonicClock, PlaybackClock};
pub use scheduler::{
    Placement, PlaybackCursor, PlaybackScheduler, SchedulerConfig, SchedulerStats,
};
pub use sink::{ChannelSink, CollectingSink, PlaybackCommand, PlaybackSink, ScheduledBuffer};
