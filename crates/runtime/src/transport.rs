//! Line framing over duplex byte streams.
//!
//! One RPC message per physical line: outgoing requests are serialized as
//! compact JSON followed by a single `\n`; inbound bytes are decoded into
//! discrete lines, with partial trailing data buffered until a delimiter
//! arrives. Message content is opaque to this layer.
//!
//! Two flavors share the same sink/source contract:
//! - [`stream_transport`] for anything `AsyncRead + AsyncWrite` (TCP,
//!   caller-supplied streams, in-memory duplex pipes in tests)
//! - [`ws_transport`] for WebSocket connections accepted at a web-server
//!   mount; text-frame payloads join the same line discipline

use crate::error::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Any duplex byte stream the supervisor can drive.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

/// Boxed duplex stream, the unit the option layer traffics in.
pub type BoxedStream = Box<dyn DuplexStream>;

/// Write half of a framed connection.
pub trait LineSink: Send {
    /// Serializes `message` and writes it as one newline-terminated frame.
    /// Writes are neither batched nor reordered relative to submission.
    fn send<'a>(
        &'a mut self,
        message: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Gracefully shuts down the write side.
    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Read half of a framed connection.
///
/// `run` decodes lines and forwards them until EOF or a transport fault;
/// the lines arrive on the receiver returned alongside the source.
pub trait LineSource: Send {
    fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// The framing halves of one connection plus the decoded-line stream.
pub struct TransportParts {
    pub sink: Box<dyn LineSink>,
    pub source: Box<dyn LineSource>,
    pub lines: mpsc::UnboundedReceiver<String>,
}

/// Splits a byte stream into line-framed halves.
pub fn stream_transport(stream: BoxedStream) -> TransportParts {
    let (read, write) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    TransportParts {
        sink: Box::new(StreamLineSink { writer: write }),
        source: Box::new(StreamLineSource {
            reader: BufReader::new(read),
            tx,
        }),
        lines: rx,
    }
}

struct StreamLineSink {
    writer: WriteHalf<BoxedStream>,
}

impl LineSink for StreamLineSink {
    fn send<'a>(
        &'a mut self,
        message: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut frame = serde_json::to_string(message)?;
            frame.push('\n');
            self.writer.write_all(frame.as_bytes()).await?;
            self.writer.flush().await?;
            Ok(())
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.writer.shutdown().await?;
            Ok(())
        })
    }
}

struct StreamLineSource {
    reader: BufReader<ReadHalf<BoxedStream>>,
    tx: mpsc::UnboundedSender<String>,
}

impl LineSource for StreamLineSource {
    fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let n = self.reader.read_until(b'\n', &mut buf).await?;
                if n == 0 {
                    return Ok(());
                }
                if buf.last() != Some(&b'\n') {
                    // Stream ended mid-line; a message is only a message
                    // once its delimiter arrives.
                    tracing::debug!(bytes = n, "discarding partial trailing line at EOF");
                    return Ok(());
                }
                buf.pop();
                let line = String::from_utf8(buf.clone())
                    .map_err(|e| Error::Transport(format!("non-UTF-8 line: {e}")))?;
                if self.tx.send(line).is_err() {
                    // Consumer is gone; stop reading.
                    return Ok(());
                }
            }
        })
    }
}

/// Splits an accepted WebSocket into line-framed halves.
///
/// Outgoing messages go out one text frame per line. Inbound text frames
/// are concatenated into the newline discipline, so a frame may carry a
/// partial line that completes in a later frame.
pub fn ws_transport<S>(ws: WebSocketStream<S>) -> TransportParts
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (write, read) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    TransportParts {
        sink: Box::new(WsLineSink { writer: write }),
        source: Box::new(WsLineSource {
            reader: read,
            tx,
            carry: String::new(),
        }),
        lines: rx,
    }
}

struct WsLineSink<S> {
    writer: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> LineSink for WsLineSink<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn send<'a>(
        &'a mut self,
        message: &'a Value,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut frame = serde_json::to_string(message)?;
            frame.push('\n');
            self.writer
                .send(WsMessage::Text(frame))
                .await
                .map_err(|e| Error::Transport(format!("websocket write: {e}")))
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.writer
                .send(WsMessage::Close(None))
                .await
                .map_err(|e| Error::Transport(format!("websocket close: {e}")))
        })
    }
}

struct WsLineSource<S> {
    reader: SplitStream<WebSocketStream<S>>,
    tx: mpsc::UnboundedSender<String>,
    carry: String,
}

impl<S> LineSource for WsLineSource<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            while let Some(message) = self.reader.next().await {
                let message =
                    message.map_err(|e| Error::Transport(format!("websocket read: {e}")))?;
                match message {
                    WsMessage::Text(text) => {
                        self.carry.push_str(&text);
                        for line in drain_complete_lines(&mut self.carry) {
                            if self.tx.send(line).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            if !self.carry.is_empty() {
                tracing::debug!(
                    bytes = self.carry.len(),
                    "discarding partial trailing line at websocket close"
                );
            }
            Ok(())
        })
    }
}

/// Removes every complete `\n`-terminated line from `carry`, in order,
/// leaving any partial trailing data buffered for the next delivery.
fn drain_complete_lines(carry: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(at) = carry.find('\n') {
        let mut line: String = carry.drain(..=at).collect();
        line.pop();
        lines.push(line);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn duplex_parts(capacity: usize) -> (TransportParts, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(capacity);
        (stream_transport(Box::new(near)), far)
    }

    #[tokio::test]
    async fn lines_arrive_in_order_with_partial_buffering() {
        let (mut parts, mut far) = duplex_parts(1024);
        let reader = tokio::spawn(parts.source.run());

        // Partial line split across two separate deliveries.
        far.write_all(b"alpha\nbra").await.unwrap();
        far.flush().await.unwrap();
        assert_eq!(parts.lines.recv().await.unwrap(), "alpha");

        far.write_all(b"vo\ncharlie\n").await.unwrap();
        far.flush().await.unwrap();
        assert_eq!(parts.lines.recv().await.unwrap(), "bravo");
        assert_eq!(parts.lines.recv().await.unwrap(), "charlie");

        drop(far);
        assert!(parts.lines.recv().await.is_none());
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn partial_trailing_line_is_discarded_at_eof() {
        let (mut parts, mut far) = duplex_parts(1024);
        let reader = tokio::spawn(parts.source.run());

        far.write_all(b"whole\nnot-terminated").await.unwrap();
        far.flush().await.unwrap();
        drop(far);

        assert_eq!(parts.lines.recv().await.unwrap(), "whole");
        assert!(parts.lines.recv().await.is_none());
        reader.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn requests_are_framed_as_json_plus_newline() {
        let (mut parts, mut far) = duplex_parts(1024);

        parts
            .sink
            .send(&serde_json::json!({"method": "greet", "arguments": ["hi"]}))
            .await
            .unwrap();
        parts.sink.send(&serde_json::json!({"id": 2})).await.unwrap();
        parts.sink.shutdown().await.unwrap();

        let mut written = String::new();
        far.read_to_string(&mut written).await.unwrap();

        let frames: Vec<&str> = written.split_terminator('\n').collect();
        assert_eq!(frames.len(), 2);
        let first: Value = serde_json::from_str(frames[0]).unwrap();
        assert_eq!(first["method"], "greet");
        let second: Value = serde_json::from_str(frames[1]).unwrap();
        assert_eq!(second["id"], 2);
        assert!(!written.contains("\n\n"));
    }

    #[test]
    fn drain_keeps_partial_tail() {
        let mut carry = String::from("one\ntwo\nthr");
        assert_eq!(drain_complete_lines(&mut carry), vec!["one", "two"]);
        assert_eq!(carry, "thr");

        carry.push_str("ee\n");
        assert_eq!(drain_complete_lines(&mut carry), vec!["three"]);
        assert!(carry.is_empty());
    }
}
