//! Async session driver
//!
//! Pulls transport events into a [`StreamSession`] one at a time, honouring an
//! external stop signal. The chunk timeout runs from the last audio chunk:
//! metadata events and recoverable parse errors do not extend it.
//! All three endings (done, stop, timeout) finalize the container.

use futures::{Stream, StreamExt};
use std::io::{Seek, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::playback::{PlaybackClock, PlaybackSink};
use crate::session::{Flow, SessionReport, StreamSession, Termination};
use crate::stream::StreamEvent;

/// Driver settings
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Longest wait for the next event
    pub chunk_timeout: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for DriverOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            chunk_timeout: config.chunk_timeout(),
        }
    }
}

/// Requests that a running session stop. Cloneable; any clone may stop it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side of a [`StopHandle`]
#[derive(Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        stop_channel().1
    }

    async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Every handle dropped without stopping
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Run `session` to completion over `events`.
///
/// Returns the report for completed, closed and stopped sessions. Fatal
/// errors (ordering, timeout, transport failure) are returned as `Err` after
/// the container has been flushed; the report can still be taken from the
/// session.
pub async fn drive<C, S, W, E>(
    session: &mut StreamSession<C, S, W>,
    events: E,
    options: &DriverOptions,
    mut stop: StopSignal,
) -> Result<SessionReport>
where
    C: PlaybackClock,
    S: PlaybackSink,
    W: Write + Seek,
    E: Stream<Item = Result<StreamEvent>>,
{
    let span = session.span().clone();
    let chunk_timeout = options.chunk_timeout;

    async move {
        let mut events = std::pin::pin!(events);
        let mut deadline = Instant::now() + chunk_timeout;
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.stopped() => {
                    info!("Stop requested");
                    return session.stop();
                }
                next = tokio::time::timeout_at(deadline, events.next()) => next,
            };

            match next {
                Err(_) => {
                    warn!("No audio chunk within {:?}", chunk_timeout);
                    session.abort(Termination::TimedOut(chunk_timeout));
                    return Err(Error::Timeout(chunk_timeout));
                }
                Ok(None) => {
                    info!("Transport closed");
                    return session.finish(Termination::Closed);
                }
                Ok(Some(Err(e))) if !e.is_fatal() => session.record_fault(e),
                Ok(Some(Err(e))) => {
                    session.abort(Termination::Failed(e.to_string()));
                    return Err(e);
                }
                Ok(Some(Ok(event))) => {
                    let is_chunk = matches!(event, StreamEvent::Chunk { .. });
                    if session.on_event(event)? == Flow::Finished {
                        return session.take_report().ok_or(Error::SessionClosed);
                    }
                    if is_chunk {
                        deadline = Instant::now() + chunk_timeout;
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}
