//! SSE parser for the relay command stream.
//!
//! Converts a raw `reqwest` byte stream into [`StreamFrame`] values.
//! Handles comment lines, partial lines split across chunks, and `\r\n` endings.
//! Frames that are not valid JSON are logged and skipped; only transport
//! failures surface as errors.

use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

use crate::error::RelayError;
use crate::types::StreamFrame;

/// Stream adapter that converts raw SSE bytes into `StreamFrame` values.
pub struct CommandStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
}

impl CommandStream {
    pub(crate) fn new(
        byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
        }
    }
}

impl Stream for CommandStream {
    type Item = Result<StreamFrame, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = try_parse_line(&mut this.buffer) {
                return Poll::Ready(Some(Ok(frame)));
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(RelayError::Network(e.to_string()))));
                }
                Poll::Ready(None) => {
                    // Flush a final unterminated line, if any
                    if !this.buffer.is_empty() {
                        this.buffer.push(b'\n');
                        if let Some(frame) = try_parse_line(&mut this.buffer) {
                            return Poll::Ready(Some(Ok(frame)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Try to extract a complete `data:` frame from the buffer.
/// Returns `None` once no complete line carrying a frame is left.
fn try_parse_line(buffer: &mut Vec<u8>) -> Option<StreamFrame> {
    loop {
        let newline_pos = buffer.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();

        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(error = %e, "dropping non UTF-8 stream line");
                continue;
            }
        };

        // Blank separators and `:` keep-alive comments
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let Some(data) = line.strip_prefix("data:") else {
            // event:, id:, retry:
            continue;
        };
        let data = data.trim();

        match serde_json::from_str::<StreamFrame>(data) {
            Ok(frame) => return Some(frame),
            Err(e) => {
                let preview: String = data.chars().take(200).collect();
                warn!(error = %e, data = %preview, "ignoring unrecognized stream frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn make_sse_bytes(chunks: &[&str]) -> Vec<Result<Bytes, reqwest::Error>> {
        chunks
            .iter()
            .map(|chunk| Ok(Bytes::from(chunk.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_parse_single_frame() {
        let data = make_sse_bytes(&[
            ": keep-alive\n",
            "data: {\"type\":\"command\",\"requestId\":\"r1\",\"action\":\"start_camera\",\"device\":\"device1\"}\n",
            "\n",
        ]);

        let mut stream = CommandStream::new(futures::stream::iter(data));

        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.name(), Some("start_camera"));
        assert_eq!(frame.device.as_deref(), Some("device1"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let data = make_sse_bytes(&["data: {\"event\":\"un", "lock\",\"device\":\"all\"}\r\n\r\n"]);

        let mut stream = CommandStream::new(futures::stream::iter(data));

        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.name(), Some("unlock"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_skipped() {
        let data = make_sse_bytes(&[
            "data: not json\n\n",
            "event: command\n",
            "data:{\"event\":\"lock\"}\n\n",
        ]);

        let mut stream = CommandStream::new(futures::stream::iter(data));

        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.name(), Some("lock"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_flushed() {
        let data = make_sse_bytes(&["data: {\"event\":\"connected\"}"]);

        let mut stream = CommandStream::new(futures::stream::iter(data));

        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.name(), Some("connected"));
    }
}
