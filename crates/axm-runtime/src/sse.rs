//! Server-Sent Events
//!
//! Splits a response byte stream into `event:` / `data:` records. Lines
//! can arrive split across chunks (and inside a multi-byte character), so
//! raw bytes are buffered and only complete lines are decoded.

use std::pin::Pin;

use axm_core::error::{AgentError, Result};
use futures::{Stream, StreamExt};

/// One dispatched event: its `data:` lines joined with `\n`, and the
/// `event:` name if one was given
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    done: bool,
}

impl SseState {
    /// Apply one line; a blank line dispatches the pending event
    fn apply_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(name) = field(line, "event") {
            self.event = Some(name.to_string());
        } else if let Some(data) = field(line, "data") {
            self.data.push(data.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Parse a byte stream into SSE events
pub fn events<S, B>(byte_stream: S) -> Pin<Box<dyn Stream<Item = Result<SseEvent>> + Send>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
{
    let bytes: ByteStream = Box::pin(byte_stream.map(|chunk| chunk.map(|b| b.as_ref().to_vec())));

    Box::pin(futures::stream::unfold(
        SseState {
            bytes,
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                while let Some(line_end) = state.buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = state.buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    if let Some(event) = state.apply_line(line.trim_end_matches(['\n', '\r'])) {
                        return Some((Ok(event), state));
                    }
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        state.done = true;
                        let error = AgentError::ProviderConnection(format!("stream interrupted: {e}"));
                        return Some((Err(error), state));
                    }
                    None => {
                        // a final line without a trailing newline, then the pending event
                        state.done = true;
                        let rest = std::mem::take(&mut state.buffer);
                        let rest = String::from_utf8_lossy(&rest);
                        let rest = rest.trim_end_matches(['\n', '\r']);
                        if !rest.is_empty() {
                            state.apply_line(rest);
                        }
                        let event = state.dispatch()?;
                        return Some((Ok(event), state));
                    }
                }
            }
        },
    ))
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<Vec<u8>>) -> impl Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static {
        futures::stream::iter(parts.into_iter().map(Ok).collect::<Vec<_>>())
    }

    fn text_chunks(parts: &'static [&'static str]) -> impl Stream<Item = reqwest::Result<Vec<u8>>> + Send + 'static {
        chunks(parts.iter().map(|p| p.as_bytes().to_vec()).collect())
    }

    #[tokio::test]
    async fn test_split_lines_are_reassembled() {
        let stream = events(text_chunks(&["data: {\"a\"", ":1}\n\nda", "ta: [DONE]\n"]));
        let records: Vec<_> = stream.map(|r| r.unwrap().data).collect().await;
        assert_eq!(records, vec!["{\"a\":1}", "[DONE]"]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let bytes = "data: 你好\n\n".as_bytes().to_vec();
        // byte 7 falls inside the first character
        let stream = events(chunks(vec![bytes[..7].to_vec(), bytes[7..].to_vec()]));
        let records: Vec<_> = stream.map(|r| r.unwrap().data).collect().await;
        assert_eq!(records, vec!["你好"]);
    }

    #[tokio::test]
    async fn test_event_names() {
        let stream = events(text_chunks(&[
            "event: content_block_delta\ndata: x\n\n",
            "data: y\n\n",
            ": keep-alive comment\n\n",
            "event: message_stop\ndata: {}",
        ]));
        let records: Vec<_> = stream.map(Result::unwrap).collect().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(records[1].event, None);
        assert_eq!(records[1].data, "y");
        assert_eq!(records[2].event.as_deref(), Some("message_stop"));
        assert_eq!(records[2].data, "{}");
    }

    #[tokio::test]
    async fn test_multiline_data_is_joined() {
        let stream = events(text_chunks(&["data: first\r\ndata: second\r\n\r\ndata: next\n\n"]));
        let records: Vec<_> = stream.map(|r| r.unwrap().data).collect().await;
        assert_eq!(records, vec!["first\nsecond", "next"]);
    }
}
