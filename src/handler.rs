//! Frame receive/send hub.
//!
//! [`FrameHandler`] drives the framing layer for one connection: it decodes
//! and validates headers, dispatches control frames without surfacing them,
//! tracks the fragment chain of the message being received, and emits
//! outbound frames through the shared write lock. Automatic responses
//! (pong, close echo, protocol-error close) take the same lock as
//! application sends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::{
    close::{self, CloseCode},
    conn::Role,
    frame::{FrameHeader, MAX_CONTROL_PAYLOAD},
    reader::{InboundMessage, PayloadCursor},
    writer::{FrameWriter, MessageWriter},
    OpCode, Result, WebSocketError,
};

/// Close-handshake flags shared between the read and write paths.
#[derive(Debug, Default)]
pub(crate) struct ConnState {
    sent_close: AtomicBool,
    received_close: AtomicBool,
}

impl ConnState {
    pub(crate) fn sent_close(&self) -> bool {
        self.sent_close.load(Ordering::SeqCst)
    }

    pub(crate) fn received_close(&self) -> bool {
        self.received_close.load(Ordering::SeqCst)
    }

    /// Marks the close frame as sent; returns whether it already was.
    fn mark_sent_close(&self) -> bool {
        self.sent_close.swap(true, Ordering::SeqCst)
    }

    fn mark_received_close(&self) {
        self.received_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sent_close() || self.received_close()
    }
}

#[derive(Debug)]
pub(crate) struct FrameHandler<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: Arc<Mutex<FrameWriter<WriteHalf<S>>>>,
    role: Role,
    state: Arc<ConnState>,
    max_payload_read: usize,
    /// Fragment-chain state of the message currently being received.
    pub(crate) inbound: Option<InboundMessage>,
}

impl<S> FrameHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        reader: BufReader<ReadHalf<S>>,
        writer: FrameWriter<WriteHalf<S>>,
        role: Role,
        max_payload_read: usize,
    ) -> Self {
        Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            role,
            state: Arc::new(ConnState::default()),
            max_payload_read,
            inbound: None,
        }
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn state(&self) -> &ConnState {
        &self.state
    }

    pub(crate) fn max_payload_read(&self) -> usize {
        self.max_payload_read
    }

    // ================ receive path ====================

    /// Advances to the opening frame of the next data message and records
    /// its fragment state. Control frames encountered on the way are
    /// dispatched here and never surface.
    ///
    /// Any unread remainder of the previous message is drained first, so a
    /// caller that abandons a message mid-read stays frame-aligned.
    pub(crate) async fn next_message(&mut self) -> Result<OpCode> {
        self.discard_current().await?;

        if self.state.received_close() {
            return Err(WebSocketError::ConnectionClosed);
        }

        loop {
            let header = self.read_validated_header().await?;

            if header.opcode.is_control() {
                self.dispatch_control(&header).await?;
                continue;
            }

            if self.state.sent_close() {
                // Closing: data frames are dropped while the peer's close
                // frame is awaited.
                self.skip_frame(&header).await?;
                continue;
            }

            if header.opcode == OpCode::Continuation {
                return Err(self.fail(WebSocketError::InvalidContinuationFrame).await);
            }

            let opcode = header.opcode;
            self.inbound = Some(InboundMessage {
                opcode,
                fin: header.fin,
                cursor: PayloadCursor::new(&header),
            });
            return Ok(opcode);
        }
    }

    /// Reads message bytes into `dst`, splicing continuation frames and
    /// dispatching interleaved control frames. `Ok(0)` is end of message.
    pub(crate) async fn read_payload(&mut self, dst: &mut [u8]) -> Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        loop {
            let (exhausted, fin) = match self.inbound.as_ref() {
                None => return Ok(0),
                Some(message) => (message.cursor.is_exhausted(), message.fin),
            };

            if !exhausted {
                let message = self.inbound.as_mut().expect("inbound message");
                return message.cursor.read(&mut self.reader, dst).await;
            }

            if fin {
                self.inbound = None;
                return Ok(0);
            }

            self.advance_fragment().await?;
        }
    }

    /// Reads one complete message, reassembling fragments.
    pub(crate) async fn read_message(&mut self) -> Result<(OpCode, Bytes)> {
        let opcode = self.next_message().await?;

        let mut payload = Vec::new();
        let mut scratch = [0u8; 8 * 1024];
        loop {
            let n = self.read_payload(&mut scratch).await?;
            if n == 0 {
                break;
            }
            if payload.len() + n > self.max_payload_read {
                return Err(self.fail(WebSocketError::FrameTooLarge).await);
            }
            payload.extend_from_slice(&scratch[..n]);
        }

        Ok((opcode, Bytes::from(payload)))
    }

    /// Pulls the next fragment of the current message. Only continuation
    /// frames may extend a message; control frames in between are handled
    /// transparently.
    async fn advance_fragment(&mut self) -> Result<()> {
        loop {
            let header = self.read_validated_header().await?;

            if header.opcode.is_control() {
                self.dispatch_control(&header).await?;
                continue;
            }

            if header.opcode != OpCode::Continuation {
                return Err(self.fail(WebSocketError::InvalidContinuationFrame).await);
            }

            let message = self.inbound.as_mut().expect("fragment chain");
            message.fin = header.fin;
            message.cursor = PayloadCursor::new(&header);
            return Ok(());
        }
    }

    /// Decodes the next frame header and applies the role rules: servers
    /// only accept masked frames, clients only unmasked ones.
    async fn read_validated_header(&mut self) -> Result<FrameHeader> {
        let header = match FrameHeader::read_from(&mut self.reader).await {
            Ok(header) => header,
            Err(err) => return Err(self.fail(err).await),
        };

        match self.role {
            Role::Server if !header.is_masked() => {
                return Err(self.fail(WebSocketError::UnmaskedFrame).await)
            }
            Role::Client if header.is_masked() => {
                return Err(self.fail(WebSocketError::MaskedFrame).await)
            }
            _ => {}
        }

        if !header.opcode.is_control() && header.payload_length > self.max_payload_read as u64 {
            return Err(self.fail(WebSocketError::FrameTooLarge).await);
        }

        log::trace!(
            "received frame header: opcode={:?} fin={} len={}",
            header.opcode,
            header.fin,
            header.payload_length
        );

        Ok(header)
    }

    /// Handles a control frame in place. Ping is answered with an identical
    /// pong before any further data is surfaced; pong is discarded; close
    /// runs the close handshake and unblocks the reader with
    /// `ConnectionClosed`.
    async fn dispatch_control(&mut self, header: &FrameHeader) -> Result<()> {
        let mut cursor = PayloadCursor::new(header);
        let payload = cursor.read_to_vec(&mut self.reader).await?;

        match header.opcode {
            OpCode::Ping => {
                log::debug!("received ping ({} bytes), answering pong", payload.len());
                if !self.state.sent_close() {
                    let mut writer = self.writer.lock().await;
                    if let Err(err) = writer.write_message(OpCode::Pong, &payload).await {
                        log::debug!("failed to answer ping: {}", err);
                        return Err(err);
                    }
                }
                Ok(())
            }
            OpCode::Pong => {
                log::debug!("received pong ({} bytes), ignoring", payload.len());
                Ok(())
            }
            OpCode::Close => {
                self.state.mark_received_close();

                let (code, reason) = match close::parse_close_payload(&payload) {
                    Ok(parsed) => parsed,
                    Err(err) => return Err(self.fail(err).await),
                };
                log::debug!("received close: code={:?} reason={:?}", code, reason);

                if !self.state.mark_sent_close() {
                    let echo = close::close_payload(code.unwrap_or(CloseCode::Normal), "");
                    let mut writer = self.writer.lock().await;
                    if let Err(err) = writer.write_message(OpCode::Close, &echo).await {
                        log::debug!("failed to echo close frame: {}", err);
                    }
                }

                Err(WebSocketError::ConnectionClosed)
            }
            _ => unreachable!("data opcode dispatched as control"),
        }
    }

    /// Reads and discards one frame's payload.
    async fn skip_frame(&mut self, header: &FrameHeader) -> Result<()> {
        let mut cursor = PayloadCursor::new(header);
        let mut scratch = [0u8; 4 * 1024];
        while !cursor.is_exhausted() {
            cursor.read(&mut self.reader, &mut scratch).await?;
        }
        Ok(())
    }

    /// Drains whatever is left of the current message.
    async fn discard_current(&mut self) -> Result<()> {
        let mut scratch = [0u8; 4 * 1024];
        while self.inbound.is_some() {
            if self.read_payload(&mut scratch).await? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Answers a protocol violation with a close frame (status 1002 family)
    /// before handing the error back to the caller.
    pub(crate) async fn fail(&mut self, err: WebSocketError) -> WebSocketError {
        if let Some(code) = err.close_code() {
            if !self.state.mark_sent_close() {
                let payload = close::close_payload(code, &err.to_string());
                let mut writer = self.writer.lock().await;
                if let Err(write_err) = writer.write_message(OpCode::Close, &payload).await {
                    log::debug!("failed to send close after protocol error: {}", write_err);
                }
            }
        }
        err
    }

    // ================ send path ====================

    /// Writes one complete single-frame message.
    ///
    /// A close frame sent this way enters the closing state exactly as
    /// [`close`](FrameHandler::close) does.
    pub(crate) async fn write_message(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.check_send(opcode, payload.len() as u64)?;
        if opcode == OpCode::Close {
            self.state.mark_sent_close();
        }

        let mut writer = self.writer.lock().await;
        writer.write_message(opcode, payload).await
    }

    /// Emits a frame header for `payload_length` bytes and hands back a
    /// streaming writer holding the write lock.
    pub(crate) async fn next_writer(
        &self,
        opcode: OpCode,
        payload_length: u64,
    ) -> Result<MessageWriter<WriteHalf<S>>> {
        self.check_send(opcode, payload_length)?;
        if opcode == OpCode::Close {
            self.state.mark_sent_close();
        }

        let mut guard = Arc::clone(&self.writer).lock_owned().await;
        let masker = guard.start_frame(opcode, payload_length).await?;
        Ok(MessageWriter::new(guard, masker, payload_length))
    }

    fn check_send(&self, opcode: OpCode, payload_length: u64) -> Result<()> {
        if opcode == OpCode::Continuation {
            return Err(WebSocketError::InvalidSendOpCode(opcode));
        }
        if opcode.is_control() && payload_length > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::ControlFrameTooLarge);
        }
        if self.state.is_closed() {
            return Err(WebSocketError::ConnectionClosed);
        }
        Ok(())
    }

    /// Sends a close frame, entering the closing state. Idempotent: a close
    /// that was already sent (by us or as an automatic response) is not
    /// repeated.
    pub(crate) async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if self.state.mark_sent_close() {
            return Ok(());
        }

        log::debug!("sending close: code={:?} reason={:?}", code, reason);
        let payload = close::close_payload(code, reason);
        let mut writer = self.writer.lock().await;
        writer.write_message(OpCode::Close, &payload).await
    }

    /// Shuts down the write side of the underlying stream.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}
