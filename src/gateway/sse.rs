//! Minimal `text/event-stream` decoder.
//!
//! Only the `data` field matters to the progress channel. Comment lines,
//! `event`, `id` and `retry` fields are skipped. Multiple `data` lines of one
//! event are joined with `\n`, and an event is dispatched on the blank line
//! that ends it. A trailing event without its blank line is discarded when
//! the stream ends.

use crate::error::GatewayError;
use futures::stream::{self, StreamExt};
use std::fmt;
use tokio_stream::Stream;

/// Incremental decoder fed with arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the `data` of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        // Lines are decoded only once complete, so a multi-byte character
        // split across chunks never reaches from_utf8_lossy half-formed.
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.data.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            }
        }
        None
    }
}

/// Adapt a byte-chunk stream (e.g. `reqwest::Response::bytes_stream`) into a
/// stream of event payloads. A chunk error becomes a connectivity error item.
pub fn data_events<S, B, E>(chunks: S) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut decoder = SseDecoder::new();
    chunks.flat_map(move |chunk| {
        let items: Vec<Result<String, GatewayError>> = match chunk {
            Ok(bytes) => decoder.push(bytes.as_ref()).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(GatewayError::Connectivity {
                reason: e.to_string(),
            })],
        };
        stream::iter(items)
    })
}
