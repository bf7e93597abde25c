//! Line-delimited message I/O for worker connections.
//!
//! Workers speak newline-delimited JSON. [`Connection`] frames any async
//! byte stream (plain TCP or TLS) into lines, capped at [`MAX_LINE_LENGTH`].
//! The [`Transport`] trait abstracts this so sessions can be driven over
//! channels in tests.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::trace;

use super::error::{StratumError, StratumResult};
use super::messages::ServerMessage;

/// Longest accepted request line, in bytes.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// One unit read from a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, newline stripped
    Line(String),

    /// A line longer than [`MAX_LINE_LENGTH`]; its bytes were discarded
    Oversized,

    /// A complete line that was not valid UTF-8
    NotUtf8,
}

/// Message-level I/O for the worker protocol.
#[async_trait]
pub trait Transport: Send {
    /// Read the next frame.
    ///
    /// Returns `None` on clean connection close (EOF). Must be cancel safe:
    /// sessions race it against job notifications.
    async fn read_frame(&mut self) -> StratumResult<Option<Frame>>;

    /// Write one message followed by a newline.
    async fn write_message(&mut self, msg: &ServerMessage) -> StratumResult<()>;
}

/// Line decoder that reports over-long and non-UTF-8 lines as frames
/// instead of failing the stream.
#[derive(Debug)]
pub struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }

    fn map(result: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, StratumError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            // LinesCodec keeps discarding up to the next newline on its own.
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
            // The offending line has already been consumed from the buffer.
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Frame::NotUtf8))
            }
            Err(LinesCodecError::Io(e)) => Err(StratumError::Io(e)),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = StratumError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StratumError> {
        Self::map(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StratumError> {
        Self::map(self.lines.decode_eof(src))
    }
}

/// Framed connection over any async byte stream.
pub struct Connection<S> {
    reader: FramedRead<ReadHalf<S>, FrameCodec>,
    writer: FramedWrite<WriteHalf<S>, LinesCodec>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        Self {
            reader: FramedRead::new(read_half, FrameCodec::new()),
            writer: FramedWrite::new(write_half, LinesCodec::new()),
        }
    }
}

#[async_trait]
impl<S> Transport for Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn read_frame(&mut self) -> StratumResult<Option<Frame>> {
        loop {
            match self.reader.next().await.transpose()? {
                Some(Frame::Line(line)) if line.trim().is_empty() => continue,
                Some(Frame::Line(line)) => {
                    trace!(rx = %line, "Received line");
                    return Ok(Some(Frame::Line(line)));
                }
                other => return Ok(other),
            }
        }
    }

    async fn write_message(&mut self, msg: &ServerMessage) -> StratumResult<()> {
        let json = serde_json::to_string(msg)?;
        trace!(tx = %json, "Sending message");

        self.writer.send(json).await.map_err(|e| match e {
            LinesCodecError::Io(e) if is_disconnect(e.kind()) => StratumError::Disconnected,
            e => StratumError::from(e),
        })
    }
}

fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(kind, BrokenPipe | ConnectionReset | ConnectionAborted)
}

/// Channel-based transport for deterministic testing.
///
/// Create a pair with [`MockTransport::pair()`]; the transport is the
/// session's side, the handle is the test's side. Dropping the handle (or
/// calling [`MockTransportHandle::hang_up`]) reads as EOF.
#[cfg(test)]
pub(crate) struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<Frame>,
    tx: tokio::sync::mpsc::UnboundedSender<ServerMessage>,
}

/// Test-side handle for a [`MockTransport`].
#[cfg(test)]
pub(crate) struct MockTransportHandle {
    tx: Option<tokio::sync::mpsc::UnboundedSender<Frame>>,
    rx: tokio::sync::mpsc::UnboundedReceiver<ServerMessage>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a linked (transport, handle) pair.
    pub fn pair() -> (Self, MockTransportHandle) {
        let (session_tx, handle_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle_tx, session_rx) = tokio::sync::mpsc::unbounded_channel();

        let transport = MockTransport {
            rx: session_rx,
            tx: session_tx,
        };
        let handle = MockTransportHandle {
            tx: Some(handle_tx),
            rx: handle_rx,
        };
        (transport, handle)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn read_frame(&mut self) -> StratumResult<Option<Frame>> {
        Ok(self.rx.recv().await)
    }

    async fn write_message(&mut self, msg: &ServerMessage) -> StratumResult<()> {
        self.tx
            .send(msg.clone())
            .map_err(|_| StratumError::Disconnected)
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Feed a raw frame to the session.
    pub fn send_frame(&self, frame: Frame) {
        self.tx
            .as_ref()
            .expect("already hung up")
            .send(frame)
            .expect("transport dropped");
    }

    /// Feed a JSON request to the session.
    pub fn send(&self, request: serde_json::Value) {
        self.send_frame(Frame::Line(request.to_string()));
    }

    /// Close the session's read side.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }

    /// Receive a message the session wrote.
    pub async fn recv(&mut self) -> ServerMessage {
        self.rx.recv().await.expect("transport dropped")
    }

    /// Receive a message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.rx.try_recv().ok()
    }
}
