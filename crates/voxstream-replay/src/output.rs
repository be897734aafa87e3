//! Paced output task: stands in for an audio device by waiting until each
//! scheduled buffer's start instant before "playing" it.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use voxstream_core::playback::PlaybackCommand;
use voxstream_core::{MonotonicClock, PlaybackClock};

#[derive(Debug, Default, Clone, Copy)]
pub struct OutputStats {
    pub buffers_played: usize,
    pub played: Duration,
    pub cancelled: bool,
}

pub async fn run(
    mut rx: mpsc::UnboundedReceiver<PlaybackCommand>,
    clock: MonotonicClock,
) -> OutputStats {
    let mut stats = OutputStats::default();
    while let Some(command) = rx.recv().await {
        match command {
            PlaybackCommand::Play(scheduled) => {
                let wait = scheduled.start.saturating_sub(clock.now());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                debug!(
                    "Playing chunk {} at {:?} ({} samples)",
                    scheduled.buffer.origin_chunk(),
                    scheduled.start,
                    scheduled.buffer.len()
                );
                stats.buffers_played += 1;
                stats.played += scheduled.duration;
            }
            PlaybackCommand::Cancel => {
                info!("Output cancelled");
                stats.cancelled = true;
                break;
            }
        }
    }
    stats
}
