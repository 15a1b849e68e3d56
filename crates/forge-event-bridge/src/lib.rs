// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull-style decoder for the agent runtime's `text/event-stream` feed.
//!
//! The runtime never pushes — callers drain [`SseFramer`] line by line (or
//! wrap it in a [`futures::Stream`] via [`decode_lines`]) rather than
//! buffering the whole feed in memory.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use futures::Stream;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;

/// A single framed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if one was set for this frame.
    pub event: Option<String>,
    /// The accumulated `data:` lines, joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Best-effort JSON decode of `data`, falling back to `None` (callers
    /// that want the raw string already have it in `data`).
    #[must_use]
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }
}

/// Incremental line-by-line SSE frame assembler.
///
/// `:`-prefixed lines are comments and ignored. `event:` sets the current
/// frame's name. `data:` lines accumulate. A blank line flushes the
/// accumulated frame (if it had any content) and resets state.
#[derive(Debug, Default)]
pub struct SseFramer {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseFramer {
    /// Creates an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without its trailing newline) into the framer.
    /// Returns `Some(event)` if this line was a blank line that flushed a
    /// non-empty frame.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.flush();
        }
        if let Some(rest) = line.strip_prefix(':') {
            let _ = rest;
            return None;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
            return None;
        }
        None
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }
}

/// Wraps an `AsyncBufRead` of raw SSE bytes into a pull stream of decoded
/// frames, one line read at a time.
pub fn decode_lines<R>(reader: R) -> impl Stream<Item = std::io::Result<SseEvent>>
where
    R: AsyncBufRead + Unpin,
{
    let lines = LinesStream::new(reader.lines());
    let framer = SseFramer::new();
    futures::stream::unfold(
        (lines, framer, false),
        |(mut lines, mut framer, mut done)| async move {
            loop {
                if done {
                    return None;
                }
                match lines.next().await {
                    Some(Ok(line)) => {
                        if let Some(event) = framer.push_line(&line) {
                            return Some((Ok(event), (lines, framer, done)));
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "sse stream read error");
                        return Some((Err(e), (lines, framer, done)));
                    }
                    None => {
                        done = true;
                        if let Some(event) = framer.flush() {
                            return Some((Ok(event), (lines, framer, done)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Recursively searches a decoded JSON value for a `sessionID` or
/// `session_id` key whose value equals `target`, at any nesting depth.
#[must_use]
pub fn matches_session(value: &Value, target: &str) -> bool {
    match value {
        Value::Object(map) => {
            for key in ["sessionID", "session_id"] {
                if let Some(Value::String(s)) = map.get(key) {
                    if s == target {
                        return true;
                    }
                }
            }
            map.values().any(|v| matches_session(v, target))
        }
        Value::Array(items) => items.iter().any(|v| matches_session(v, target)),
        _ => false,
    }
}

/// Filters a stream of decoded SSE frames down to those whose JSON payload
/// (at any depth) references `session_id`.
pub fn iter_session_events<S>(
    events: S,
    session_id: String,
) -> impl Stream<Item = std::io::Result<SseEvent>>
where
    S: Stream<Item = std::io::Result<SseEvent>>,
{
    futures::stream::StreamExt::filter(events, move |item| {
        let keep = match item {
            Ok(event) => match event.json() {
                Some(value) => matches_session(&value, &session_id),
                None => false,
            },
            Err(_) => true,
        };
        futures::future::ready(keep)
    })
}
