//! Outbound frame writer.
//!
//! [`FrameWriter`] owns the buffered write half of the stream and emits
//! complete frames: header first, then payload bytes masked on the fly for
//! the client role. It sits behind a mutex shared by application sends and
//! the handler's automatic control responses (pong, close echo).

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::OwnedMutexGuard;

use crate::{
    conn::Role,
    frame::{FrameHeader, MAX_HEAD_SIZE},
    mask::Masker,
    OpCode, Result, WebSocketError,
};

#[derive(Debug)]
pub(crate) struct FrameWriter<W> {
    writer: BufWriter<W>,
    role: Role,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(writer: BufWriter<W>, role: Role) -> Self {
        Self { writer, role }
    }

    /// Emits a frame header for a single-frame message (`fin` always set)
    /// and returns the masker for the payload bytes that must follow.
    ///
    /// Client-role frames get a fresh random masking key per frame.
    pub(crate) async fn start_frame(
        &mut self,
        opcode: OpCode,
        payload_length: u64,
    ) -> Result<Option<Masker>> {
        let mask = match self.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };

        let header = FrameHeader::new(true, opcode, mask, payload_length);
        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = header.fmt_head(&mut head);
        self.writer.write_all(&head[..size]).await?;

        log::trace!(
            "sending frame: opcode={:?} len={} masked={}",
            opcode,
            payload_length,
            mask.is_some()
        );

        Ok(mask.map(Masker::new))
    }

    /// Writes payload bytes for the current frame, masking a copy when a
    /// masker is present (the caller's buffer is left untouched).
    pub(crate) async fn write_payload(
        &mut self,
        buf: &[u8],
        masker: &mut Option<Masker>,
    ) -> Result<()> {
        match masker.as_mut() {
            Some(masker) => {
                let mut masked = BytesMut::from(buf);
                masker.apply(&mut masked);
                self.writer.write_all(&masked).await?;
            }
            None => self.writer.write_all(buf).await?,
        }
        Ok(())
    }

    /// Writes a complete single-frame message and flushes it to the stream.
    pub(crate) async fn write_message(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mut masker = self.start_frame(opcode, payload.len() as u64).await?;
        self.write_payload(payload, &mut masker).await?;
        self.flush().await
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Streaming writer for one outbound message.
///
/// Obtained from [`Connection::next_writer`](crate::Connection::next_writer)
/// with a declared payload length. The writer holds the connection's write
/// lock until finished, masks bytes as they are written, and refuses to let
/// the payload diverge from the declared length: overruns fail immediately
/// and [`finish`](MessageWriter::finish) fails if the payload came up short.
pub struct MessageWriter<W> {
    guard: OwnedMutexGuard<FrameWriter<W>>,
    masker: Option<Masker>,
    declared: u64,
    written: u64,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        guard: OwnedMutexGuard<FrameWriter<W>>,
        masker: Option<Masker>,
        declared: u64,
    ) -> Self {
        Self {
            guard,
            masker,
            declared,
            written: 0,
        }
    }

    /// Bytes still owed to match the declared payload length.
    pub fn remaining(&self) -> u64 {
        self.declared - self.written
    }

    /// Writes payload bytes, masking them if the connection is a client.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let written = self.written + buf.len() as u64;
        if written > self.declared {
            return Err(WebSocketError::PayloadLengthMismatch {
                declared: self.declared,
                written,
            });
        }

        self.guard.write_payload(buf, &mut self.masker).await?;
        self.written = written;
        Ok(())
    }

    /// Flushes the frame and releases the write lock.
    ///
    /// Fails with a length-mismatch error if fewer bytes were written than
    /// the frame header declared.
    pub async fn finish(mut self) -> Result<()> {
        if self.written != self.declared {
            return Err(WebSocketError::PayloadLengthMismatch {
                declared: self.declared,
                written: self.written,
            });
        }
        self.guard.flush().await
    }
}
