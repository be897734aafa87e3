//! Server-push event decoding
//!
//! The synthesizer delivers audio as a text event stream: frames of `event:`
//! and `data:` lines separated by a blank line, where `data:` carries a JSON
//! object tagged by `"type"`.

use bytes::{Buf, BytesMut};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::{Error, Result};

/// Read size for the async adapter
const READ_CHUNK: usize = 8192;

/// One inbound event from the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Base64-encoded audio fragment
    Chunk { data: String },
    /// Normal completion
    Done,
    /// Upstream gave up waiting
    Timeout,
    /// Transport closed
    Close,
    /// Anything else (word timestamps, connection notices)
    #[serde(other)]
    Other,
}

impl StreamEvent {
    /// Whether this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done | StreamEvent::Timeout | StreamEvent::Close
        )
    }

    /// Interpret one frame given its `event:` name and joined `data:` lines.
    pub fn from_frame(name: Option<&str>, data: &str) -> Result<Self> {
        let value = if data.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(value) => Some(value),
                // Terminal frames are honoured even with junk payloads
                Err(e) => match Self::from_name(name) {
                    Some(event) if event.is_terminal() => return Ok(event),
                    _ => return Err(Error::EventParse(e.to_string())),
                },
            }
        };

        if let Some(value) = value.filter(|v| v.get("type").is_some()) {
            return serde_json::from_value(value).map_err(|e| Error::EventParse(e.to_string()));
        }

        Ok(Self::from_name(name).unwrap_or(StreamEvent::Other))
    }

    fn from_name(name: Option<&str>) -> Option<Self> {
        match name? {
            "done" => Some(StreamEvent::Done),
            "timeout" => Some(StreamEvent::Timeout),
            "close" => Some(StreamEvent::Close),
            _ => None,
        }
    }
}

/// Incremental decoder: push raw bytes, pull whole events.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buf: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete event, skipping frames that carry nothing
    pub fn next_event(&mut self) -> Option<Result<StreamEvent>> {
        while let Some((frame_len, consumed)) = frame_boundary(&self.buf) {
            let frame = self.buf.split_to(consumed);
            if let Some(event) = parse_frame(&frame[..frame_len]) {
                return Some(event);
            }
        }
        None
    }

    /// Flush a trailing frame that was not followed by a blank line
    pub fn finish(&mut self) -> Option<Result<StreamEvent>> {
        if self.buf.is_empty() {
            return None;
        }
        let frame = self.buf.split();
        parse_frame(&frame)
    }

    /// Bytes received but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.remaining()
    }
}

/// Locate the first blank line: returns (frame length, bytes to consume).
fn frame_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            let mut j = i + 1;
            if buf.get(j) == Some(&b'\r') {
                j += 1;
            }
            if buf.get(j) == Some(&b'\n') {
                return Some((i, j + 1));
            }
        }
        i += 1;
    }
    None
}

fn parse_frame(frame: &[u8]) -> Option<Result<StreamEvent>> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text,
        Err(e) => return Some(Err(Error::EventParse(e.to_string()))),
    };

    let mut name = None;
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => name = Some(value),
            "data" => data.push(value),
            _ => {}
        }
    }

    if name.is_none() && data.is_empty() {
        return None;
    }

    let event = StreamEvent::from_frame(name, &data.join("\n"));
    if let Ok(ref event) = event {
        debug!(?name, kind = event_kind(event), "Decoded stream event");
    }
    Some(event)
}

fn event_kind(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::Chunk { .. } => "chunk",
        StreamEvent::Done => "done",
        StreamEvent::Timeout => "timeout",
        StreamEvent::Close => "close",
        StreamEvent::Other => "other",
    }
}

/// Adapt any byte source into a stream of events.
///
/// Parse failures are yielded as `Err(Error::EventParse)` and the stream keeps
/// going; a read failure is yielded once and ends the stream.
pub fn event_stream<R>(mut reader: R) -> impl Stream<Item = Result<StreamEvent>>
where
    R: AsyncRead + Unpin,
{
    async_stream::stream! {
        let mut decoder = EventStreamDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    yield Err(Error::IoError(e));
                    return;
                }
            };
            if n == 0 {
                break;
            }
            decoder.push(&buf[..n]);
            while let Some(event) = decoder.next_event() {
                yield event;
            }
        }
        if let Some(event) = decoder.finish() {
            yield event;
        }
    }
}
