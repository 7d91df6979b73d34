use futures::StreamExt;
use reqwest::Response;

use super::{LlmError, StreamChunk};

/// What a provider made of one `data:` payload.
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Delta(String),
    Stop,
    Ignore,
}

/// Reassembles `data:` lines from a byte stream. Bytes are buffered until a
/// newline so multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.trim().strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// Turn a non-2xx response into `LlmError::Api` with the body as message.
pub async fn error_for_status(resp: Response) -> Result<Response, LlmError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(LlmError::Api { status, message })
}

/// Pump a streaming response through `parse`, forwarding deltas to
/// `on_chunk`. The closing `done` chunk is left to
/// [`ModelClient::complete_stream`](super::ModelClient::complete_stream).
pub async fn relay(
    resp: Response,
    parse: impl Fn(&str) -> SseEvent,
    on_chunk: impl Fn(StreamChunk) + Send,
) -> Result<String, LlmError> {
    let mut full = String::new();
    let mut lines = SseLines::default();
    let mut body = resp.bytes_stream();

    'outer: while let Some(bytes) = body.next().await {
        for data in lines.push(&bytes?) {
            match parse(&data) {
                SseEvent::Delta(text) => {
                    full.push_str(&text);
                    on_chunk(StreamChunk::delta(text));
                }
                SseEvent::Stop => break 'outer,
                SseEvent::Ignore => {}
            }
        }
    }
    Ok(full)
}
