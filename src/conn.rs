//! WebSocket connection.
//!
//! A [`Connection`] owns an upgraded byte stream and exposes the message
//! API: single-frame sends, message receives with transparent
//! fragmentation and control handling, streaming readers/writers, and the
//! close handshake. The stream is split into a buffered read half used
//! exclusively by the receive path and a buffered write half shared (via
//! mutex) between application sends and automatic control responses.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter, ReadHalf, WriteHalf};

use crate::{
    close::CloseCode,
    handler::FrameHandler,
    reader::MessageReader,
    writer::{FrameWriter, MessageWriter},
    OpCode, Result, WebSocketError,
};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames or reassembled messages larger than this are rejected to prevent
/// excessively large messages from exhausting memory.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The role the connection is taking.
///
/// When a server role is taken the frames are not masked, unlike the
/// client role, in which every outbound frame is masked. On receive the
/// rule inverts: servers require masked frames, clients unmasked ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct Options {
    pub(crate) max_payload_read: usize,
    pub(crate) handshake_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: MAX_PAYLOAD_READ,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl Options {
    /// Specifies the maximum size of frames and reassembled messages that
    /// the connection will accept.
    pub fn with_max_payload_read(mut self, max: usize) -> Self {
        self.max_payload_read = max;
        self
    }

    /// Specifies how long the upgrade handshake may take before the
    /// connection attempt is abandoned.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// A WebSocket connection over an upgraded byte stream.
///
/// Created by [`dial`](crate::dial) (client role), by
/// [`listen`](crate::listen) (server role), or directly over any
/// already-upgraded stream with [`Connection::new`].
///
/// One task may receive while another sends; the connection is not safe
/// for concurrent receivers or concurrent senders.
#[derive(Debug)]
pub struct Connection<S> {
    handler: FrameHandler<S>,
    frame_type: OpCode,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a connection over an already-upgraded byte stream.
    pub fn new(stream: S, role: Role, options: &Options) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self::from_parts(BufReader::new(read), BufWriter::new(write), role, options)
    }

    /// Builds a connection from buffered halves, preserving any bytes the
    /// handshake already pulled into the read buffer.
    pub(crate) fn from_parts(
        reader: BufReader<ReadHalf<S>>,
        writer: BufWriter<WriteHalf<S>>,
        role: Role,
        options: &Options,
    ) -> Self {
        let writer = FrameWriter::new(writer, role);
        Self {
            handler: FrameHandler::new(reader, writer, role, options.max_payload_read),
            frame_type: OpCode::Binary,
            read_timeout: None,
            write_timeout: None,
        }
    }

    /// Role this endpoint plays.
    pub fn role(&self) -> Role {
        self.handler.role()
    }

    /// Opcode used by the streaming [`write`](Connection::write) API.
    /// Initially [`OpCode::Binary`].
    pub fn frame_type(&self) -> OpCode {
        self.frame_type
    }

    /// Changes the opcode used by the streaming `write` API.
    pub fn set_frame_type(&mut self, opcode: OpCode) {
        self.frame_type = opcode;
    }

    /// Whether the close handshake has started in either direction.
    pub fn is_closed(&self) -> bool {
        self.handler.state().is_closed()
    }

    /// Sends one message with the given opcode as a single final frame.
    pub async fn send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        with_timeout(self.write_timeout, self.handler.write_message(opcode, payload)).await
    }

    /// Receives the next data message, reassembling fragments and handling
    /// interleaved control frames transparently.
    ///
    /// Returns [`WebSocketError::ConnectionClosed`] once the peer's close
    /// frame has been processed.
    pub async fn receive(&mut self) -> Result<(OpCode, Bytes)> {
        with_timeout(self.read_timeout, self.handler.read_message()).await
    }

    /// Advances to the next data message and returns a streaming reader
    /// over its payload.
    ///
    /// The read timeout applies to locating the message's opening frame;
    /// subsequent `read` calls block without a deadline.
    pub async fn next_reader(&mut self) -> Result<MessageReader<'_, S>> {
        let opcode = with_timeout(self.read_timeout, self.handler.next_message()).await?;
        Ok(MessageReader::new(&mut self.handler, opcode))
    }

    /// Emits a frame header declaring `payload_length` bytes and returns a
    /// streaming writer for the payload.
    ///
    /// The writer holds the connection's write lock until finished, so
    /// exactly the declared number of bytes must be written.
    pub async fn next_writer(
        &mut self,
        opcode: OpCode,
        payload_length: u64,
    ) -> Result<MessageWriter<WriteHalf<S>>> {
        with_timeout(
            self.write_timeout,
            self.handler.next_writer(opcode, payload_length),
        )
        .await
    }

    /// Reads message bytes into `dst`.
    ///
    /// When the current message is exhausted, `Ok(0)` is returned once as
    /// an end-of-message marker; the following call starts on the next
    /// message.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let timeout = self.read_timeout;
        let handler = &mut self.handler;
        with_timeout(timeout, async {
            if handler.inbound.is_none() {
                handler.next_message().await?;
            }
            handler.read_payload(dst).await
        })
        .await
    }

    /// Sends `buf` as one message of the default [`frame_type`](Connection::frame_type).
    ///
    /// Every call produces an independent single-frame message with FIN
    /// set; streaming writes never fragment a logical message.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let opcode = self.frame_type;
        self.send(opcode, buf).await?;
        Ok(buf.len())
    }

    /// Initiates the close handshake with status 1000 and closes the
    /// stream.
    pub async fn close(&mut self) -> Result<()> {
        self.close_with(CloseCode::Normal, "closing connection").await
    }

    /// Initiates the close handshake with the given status code and reason,
    /// then shuts the write side of the underlying stream down.
    ///
    /// After this call every `send` fails with
    /// [`WebSocketError::ConnectionClosed`].
    pub async fn close_with(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        let timeout = self.write_timeout;
        let handler = &self.handler;
        with_timeout(timeout, async {
            handler.close(code, reason).await?;
            handler.shutdown().await
        })
        .await
    }

    /// Sets the deadline for receive operations. `None` blocks forever.
    ///
    /// A fired deadline surfaces as an I/O timeout error and the
    /// connection must be considered failed.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }

    /// Sets the deadline for send operations. `None` blocks forever.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.write_timeout = timeout;
    }

    /// Sets both the read and write deadlines.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
        self.write_timeout = timeout;
    }
}

/// Applies an optional deadline to an I/O future, mapping expiry onto
/// `io::ErrorKind::TimedOut`.
async fn with_timeout<T, F>(duration: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match duration {
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(WebSocketError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "operation deadline elapsed",
            ))),
        },
        None => fut.await,
    }
}
