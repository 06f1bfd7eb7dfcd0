//! Server-sent event decoding for workflow `stream_run` responses.
//!
//! The transport hands us arbitrary byte chunks. Lines are only
//! interpreted once complete, and UTF-8 sequences split across chunk
//! boundaries are carried over instead of being decoded in isolation.

use crate::services::client::WorkflowError;
use futures_util::{Stream, StreamExt};
use log::debug;
use serde::Deserialize;
use serde_json::Value;

pub const EVENT_PREFIX: &str = "data:";
pub const TERMINAL_NODE_TYPE: &str = "End";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub node_type: String,
    #[serde(default, deserialize_with = "content_as_text")]
    pub content: Option<String>,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        self.node_type == TERMINAL_NODE_TYPE
    }
}

// `content` is usually a JSON-encoded string, but some workflow versions
// inline the object itself.
fn content_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Incremental UTF-8 decoder. Incomplete trailing sequences are held back
/// until the next chunk; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut start = 0;
        while start < buf.len() {
            match std::str::from_utf8(&buf[start..]) {
                Ok(s) => {
                    out.push_str(s);
                    start = buf.len();
                }
                Err(e) => {
                    let end = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&buf[start..end]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = end + len;
                        }
                        None => {
                            start = end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = buf.split_off(start);
        out
    }

    /// Flushes whatever is still pending at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

/// Parses one complete line. Anything that is not a well-formed `data:`
/// event yields `None`.
pub fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let data = line.trim().strip_prefix(EVENT_PREFIX)?.trim();
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping malformed stream event: {}", e);
            None
        }
    }
}

/// Line-buffered event decoder that remembers the last terminal payload.
#[derive(Debug, Default)]
pub struct EventDecoder {
    utf8: Utf8Decoder,
    buffer: String,
    terminal: Option<String>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns the events completed by it,
    /// in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.accept(&line) {
                events.push(event);
            }
        }
        events
    }

    fn accept(&mut self, line: &str) -> Option<StreamEvent> {
        let event = parse_event_line(line)?;
        if event.is_terminal() {
            if let Some(content) = event.content.as_ref().filter(|c| !c.is_empty()) {
                self.terminal = Some(content.clone());
            }
        }
        Some(event)
    }

    pub fn terminal(&self) -> Option<&str> {
        self.terminal.as_deref()
    }

    /// Ends the stream. A trailing line without a newline is still
    /// considered.
    pub fn finish(mut self) -> Result<String, WorkflowError> {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        let rest = std::mem::take(&mut self.buffer);
        self.accept(&rest);

        self.terminal.ok_or(WorkflowError::StreamEmpty)
    }
}

/// Drains a chunked byte stream and returns the content of the last
/// terminal event.
pub async fn read_terminal_payload<S, B, E>(stream: S) -> Result<String, WorkflowError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<WorkflowError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = EventDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        decoder.push(chunk.as_ref());
    }

    decoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const SAMPLE: &str = "event: Message\n\
        data: {\"node_type\": \"Start\", \"content\": \"忽略\"}\n\
        data: not json at all\n\
        \n\
        data:\n\
        data: {\"node_type\": \"End\", \"content\": \"{\\\"风格名称\\\": \\\"赛博朋克\\\"}\"}\n\
        event: Done\n";

    async fn decode_chunks(chunks: Vec<Vec<u8>>) -> Result<String, WorkflowError> {
        read_terminal_payload(stream::iter(chunks.into_iter().map(Ok::<_, WorkflowError>))).await
    }

    #[tokio::test]
    async fn test_single_chunk() {
        let payload = decode_chunks(vec![SAMPLE.as_bytes().to_vec()]).await.unwrap();
        assert_eq!(payload, "{\"风格名称\": \"赛博朋克\"}");
    }

    #[tokio::test]
    async fn test_every_split_point_yields_same_payload() {
        let bytes = SAMPLE.as_bytes();
        let expected = decode_chunks(vec![bytes.to_vec()]).await.unwrap();

        for split in 1..bytes.len() {
            let chunks = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
            let payload = decode_chunks(chunks).await.unwrap();
            assert_eq!(payload, expected, "split at byte {}", split);
        }
    }

    #[tokio::test]
    async fn test_byte_by_byte_chunks() {
        let chunks: Vec<Vec<u8>> = SAMPLE.as_bytes().iter().map(|b| vec![*b]).collect();
        let payload = decode_chunks(chunks).await.unwrap();
        assert_eq!(payload, "{\"风格名称\": \"赛博朋克\"}");
    }

    #[tokio::test]
    async fn test_last_terminal_event_wins() {
        let input = "data: {\"node_type\": \"End\", \"content\": \"first\"}\n\
                     data: {\"node_type\": \"End\", \"content\": \"\"}\n\
                     data: {\"node_type\": \"End\", \"content\": \"second\"}\n";
        let payload = decode_chunks(vec![input.as_bytes().to_vec()]).await.unwrap();
        assert_eq!(payload, "second");
    }

    #[tokio::test]
    async fn test_no_terminal_event_is_stream_empty() {
        let input = "data: {\"node_type\": \"Message\", \"content\": \"partial\"}\n\
                     data: {\"node_type\": \"End\"}\n";
        let result = decode_chunks(vec![input.as_bytes().to_vec()]).await;
        assert!(matches!(result, Err(WorkflowError::StreamEmpty)));

        let result = decode_chunks(vec![]).await;
        assert!(matches!(result, Err(WorkflowError::StreamEmpty)));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let input = "data: {\"node_type\": \"End\", \"content\": \"tail\"}";
        let payload = decode_chunks(vec![input.as_bytes().to_vec()]).await.unwrap();
        assert_eq!(payload, "tail");
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let chunks = vec![
            Ok(b"data: {\"node_type\": \"End\", \"content\": \"x\"}\n".to_vec()),
            Err(WorkflowError::StreamEmpty),
        ];
        let result = read_terminal_payload(stream::iter(chunks)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_object_content_is_serialized() {
        let event = parse_event_line(r#"data: {"node_type": "End", "content": {"output": ["u"]}}"#).unwrap();
        assert!(event.is_terminal());
        assert_eq!(event.content.as_deref(), Some(r#"{"output":["u"]}"#));
    }

    #[test]
    fn test_push_returns_completed_events_in_order() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(b"data: {\"node_type\": \"Start\"}\ndata: {\"node_t");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node_type, "Start");

        let events = decoder.push(b"ype\": \"End\", \"content\": \"ok\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.terminal(), Some("ok"));
    }

    #[test]
    fn test_utf8_decoder_split_multibyte() {
        let bytes = "风格".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&decoder.decode(&[*b]));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, "风格");
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }
}
