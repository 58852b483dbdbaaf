// SSE re-encoding of the upstream event stream

use axum::response::sse::Event;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::fmt::Display;

use super::errors::GatewayError;
use super::mappers::upstream::{parse_response, UpstreamResponse};

/// One outbound SSE event. `event` is the `event:` line, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl SseFrame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: &'static str, data: &Value) -> Self {
        Self {
            event: Some(event),
            data: data.to_string(),
        }
    }

    pub fn into_event(self) -> Event {
        let event = Event::default().data(self.data);
        match self.event {
            Some(name) => event.event(name),
            None => event,
        }
    }
}

/// Splits incoming bytes into complete lines, keeping the unterminated
/// tail for the next read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whatever is left once the upstream has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamChunk {
    /// The unwrapped `response` object as received.
    pub raw: Value,
    pub response: UpstreamResponse,
}

#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Chunk(UpstreamChunk),
    Done,
}

/// Parse one SSE line. Non-data lines and malformed payloads yield `None`.
pub fn parse_line(line: &str) -> Option<UpstreamEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(UpstreamEvent::Done);
    }

    let parsed = serde_json::from_str::<Value>(data)
        .map_err(anyhow::Error::from)
        .and_then(parse_response);
    match parsed {
        Ok((raw, response)) => Some(UpstreamEvent::Chunk(UpstreamChunk { raw, response })),
        Err(e) => {
            tracing::warn!("Skipping malformed upstream event: {}", e);
            None
        }
    }
}

/// Per-protocol re-encoder state machine.
pub trait StreamEncoder: Send {
    fn on_chunk(&mut self, chunk: &UpstreamChunk) -> Vec<SseFrame>;

    /// Upstream sent the `[DONE]` sentinel.
    fn on_done(&mut self) -> Vec<SseFrame> {
        Vec::new()
    }

    /// Upstream closed the connection.
    fn on_eof(&mut self) -> Vec<SseFrame> {
        Vec::new()
    }

    /// Once true, the driver stops reading the upstream.
    fn is_finished(&self) -> bool;
}

/// Drive `encoder` over the upstream byte stream.
///
/// Frames are produced lazily, one upstream read at a time. A read error
/// ends the stream with `Err`, which aborts the response body.
pub fn transcode<S, E, C>(
    upstream: S,
    mut encoder: C,
) -> impl Stream<Item = Result<SseFrame, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
    C: StreamEncoder + 'static,
{
    async_stream::stream! {
        let mut buffer = LineBuffer::default();
        let mut upstream = Box::pin(upstream);

        while let Some(chunk) = upstream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!("Upstream stream read failed: {}", e);
                    yield Err(GatewayError::Stream(e.to_string()));
                    return;
                }
            };

            for line in buffer.push(&bytes) {
                let frames = match parse_line(&line) {
                    Some(UpstreamEvent::Chunk(chunk)) => encoder.on_chunk(&chunk),
                    Some(UpstreamEvent::Done) => encoder.on_done(),
                    None => continue,
                };
                for frame in frames {
                    yield Ok(frame);
                }
                if encoder.is_finished() {
                    return;
                }
            }
        }

        if let Some(line) = buffer.finish() {
            let frames = match parse_line(&line) {
                Some(UpstreamEvent::Chunk(chunk)) => encoder.on_chunk(&chunk),
                Some(UpstreamEvent::Done) => encoder.on_done(),
                None => Vec::new(),
            };
            for frame in frames {
                yield Ok(frame);
            }
            if encoder.is_finished() {
                return;
            }
        }

        for frame in encoder.on_eof() {
            yield Ok(frame);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    /// Echoes the text of every chunk; finishes on a finish reason.
    struct EchoEncoder {
        finished: bool,
    }

    impl StreamEncoder for EchoEncoder {
        fn on_chunk(&mut self, chunk: &UpstreamChunk) -> Vec<SseFrame> {
            if chunk.response.finish_reason().is_some() {
                self.finished = true;
                return vec![SseFrame::data("finish")];
            }
            vec![SseFrame::data(chunk.response.text())]
        }

        fn on_eof(&mut self) -> Vec<SseFrame> {
            vec![SseFrame::data("eof")]
        }

        fn is_finished(&self) -> bool {
            self.finished
        }
    }

    fn data_of(frames: Vec<Result<SseFrame, GatewayError>>) -> Vec<String> {
        frames.into_iter().map(|f| f.unwrap().data).collect()
    }

    #[test]
    fn test_line_buffer_keeps_partial_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        assert_eq!(buffer.push(b": 1}\r\ndata: x\n"), vec!["data: {\"a\": 1}", "data: x"]);
        assert!(buffer.push(b"tail").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_survives_split_utf8() {
        let bytes = "data: héllo\n".as_bytes();
        let split = bytes.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&bytes[..split]).is_empty());
        assert_eq!(buffer.push(&bytes[split..]), vec!["data: héllo"]);
    }

    #[test]
    fn test_parse_line_variants() {
        assert!(parse_line("event: ping").is_none());
        assert!(parse_line("data: ").is_none());
        assert!(matches!(parse_line("data: [DONE]"), Some(UpstreamEvent::Done)));
        assert!(parse_line("data: {broken").is_none());
        match parse_line(r#"data: {"candidates": [{"content": {"parts": [{"text": "bare"}]}}]}"#) {
            Some(UpstreamEvent::Chunk(chunk)) => assert_eq!(chunk.response.text(), "bare"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_stream() {
        let frames = run(
            vec![
                text_chunk("one"),
                "data: {not json}\n\n".to_string(),
                text_chunk("two"),
            ],
            EchoEncoder { finished: false },
        )
        .await;
        assert_eq!(data_of(frames), vec!["one", "two", "eof"]);
    }

    #[tokio::test]
    async fn test_reading_stops_after_finish() {
        let frames = run(
            vec![text_chunk("a"), finish_chunk("STOP"), text_chunk("ignored")],
            EchoEncoder { finished: false },
        )
        .await;
        assert_eq!(data_of(frames), vec!["a", "finish"]);
    }

    #[tokio::test]
    async fn test_events_split_across_reads() {
        let whole = text_chunk("split");
        let (a, b) = whole.split_at(17);
        let frames = run(
            vec![a.to_string(), b.to_string()],
            EchoEncoder { finished: false },
        )
        .await;
        assert_eq!(data_of(frames), vec!["split", "eof"]);
    }

    #[tokio::test]
    async fn test_read_error_aborts_with_err() {
        let upstream = futures::stream::iter(vec![
            Ok(Bytes::from(text_chunk("before"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from(text_chunk("after"))),
        ]);
        let frames: Vec<_> = transcode(upstream, EchoEncoder { finished: false })
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap().data, "before");
        assert!(matches!(frames[1], Err(GatewayError::Stream(_))));
    }

    #[test]
    fn test_frame_into_event_keeps_name() {
        let frame = SseFrame::named("message_stop", &serde_json::json!({"type": "message_stop"}));
        assert_eq!(frame.event, Some("message_stop"));
        let _event: Event = frame.into_event();
    }
}
