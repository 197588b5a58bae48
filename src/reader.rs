//! Inbound payload cursors.
//!
//! One frame's payload is a bounded byte budget ([`PayloadCursor`]); a
//! logical message is a chain of such budgets spliced across continuation
//! frames. The chain is held as explicit state on the frame handler rather
//! than as nested readers, so pulling the next fragment is a state
//! transition instead of a recursive call.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::{
    frame::FrameHeader,
    handler::FrameHandler,
    mask::Masker,
    OpCode, Result, WebSocketError,
};

/// Byte budget for a single frame's payload.
///
/// Reads never cross the frame boundary: once `remaining` reaches zero the
/// cursor reports end-of-frame regardless of how many bytes the caller
/// asks for. Masked payloads are unmasked on the fly with a rolling
/// offset, so chunk boundaries do not matter.
#[derive(Debug)]
pub(crate) struct PayloadCursor {
    length: u64,
    remaining: u64,
    masker: Option<Masker>,
}

impl PayloadCursor {
    pub(crate) fn new(header: &FrameHeader) -> Self {
        Self {
            length: header.payload_length,
            remaining: header.payload_length,
            masker: header.mask.map(Masker::new),
        }
    }

    /// Total payload length of the frame.
    pub(crate) fn length(&self) -> u64 {
        self.length
    }

    /// Bytes of this frame not yet consumed.
    pub(crate) fn remaining(&self) -> u64 {
        self.remaining
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Fills `dst` with at most `remaining` bytes, unmasking in place.
    ///
    /// Returns `Ok(0)` only when the frame is exhausted or `dst` is empty;
    /// a short read from the underlying stream before the budget is met is
    /// an unexpected EOF.
    pub(crate) async fn read<R>(&mut self, reader: &mut R, dst: &mut [u8]) -> Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let cap = dst.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        if cap == 0 {
            return Ok(0);
        }

        let n = reader.read(&mut dst[..cap]).await?;
        if n == 0 {
            return Err(WebSocketError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed mid-frame",
            )));
        }

        if let Some(masker) = self.masker.as_mut() {
            masker.apply(&mut dst[..n]);
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    /// Drains the whole budget into a vector. Only used for control frames,
    /// whose payloads are at most 125 bytes.
    pub(crate) async fn read_to_vec<R>(&mut self, reader: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.remaining as usize];
        reader.read_exact(&mut buf).await?;
        if let Some(masker) = self.masker.as_mut() {
            masker.apply(&mut buf);
        }
        self.remaining = 0;
        Ok(buf)
    }
}

/// The fragment-chain state of the message currently being received.
#[derive(Debug)]
pub(crate) struct InboundMessage {
    /// Message opcode, taken from the opening frame.
    pub(crate) opcode: OpCode,
    /// Whether the current frame carries the FIN bit.
    pub(crate) fin: bool,
    /// Budget of the frame currently being drained.
    pub(crate) cursor: PayloadCursor,
}

/// Streaming reader over one logical message.
///
/// Obtained from [`Connection::next_reader`](crate::Connection::next_reader).
/// Reading transparently splices continuation frames into one byte stream
/// and handles control frames interleaved between fragments; `read`
/// returning `Ok(0)` marks the end of the message.
pub struct MessageReader<'a, S> {
    handler: &'a mut FrameHandler<S>,
    opcode: OpCode,
}

impl<'a, S> MessageReader<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(handler: &'a mut FrameHandler<S>, opcode: OpCode) -> Self {
        Self { handler, opcode }
    }

    /// Opcode of the message's opening frame (`Text` or `Binary`).
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Payload length of the fragment currently being drained.
    pub fn frame_length(&self) -> u64 {
        self.handler
            .inbound
            .as_ref()
            .map(|m| m.cursor.length())
            .unwrap_or(0)
    }

    /// Unconsumed bytes of the fragment currently being drained.
    pub fn frame_remaining(&self) -> u64 {
        self.handler
            .inbound
            .as_ref()
            .map(|m| m.cursor.remaining())
            .unwrap_or(0)
    }

    /// Reads message bytes into `dst`, returning the count read.
    ///
    /// `Ok(0)` signals the end of the message.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.handler.read_payload(dst).await
    }

    /// Drains the rest of the message into `buf`, returning the number of
    /// bytes appended. Fails with `FrameTooLarge` if the accumulated
    /// message exceeds the configured maximum payload size.
    pub async fn read_to_end(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        let mut scratch = [0u8; 8 * 1024];
        loop {
            let n = self.handler.read_payload(&mut scratch).await?;
            if n == 0 {
                return Ok(buf.len() - start);
            }
            if buf.len() - start + n > self.handler.max_payload_read() {
                return Err(self.handler.fail(WebSocketError::FrameTooLarge).await);
            }
            buf.extend_from_slice(&scratch[..n]);
        }
    }
}
