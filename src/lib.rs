//! An RFC 6455 WebSocket protocol library.
//!
//! `skiff` implements the byte-level framing engine, the connection state
//! machine, and the streaming read/write pipeline that carries application
//! messages over a full-duplex byte stream. Client and server roles share
//! one framing core; the HTTP/1.1 upgrade handshake is handled at the
//! boundary by a minimal parser, after which the raw stream is owned by a
//! [`Connection`].
//!
//! # Quick start
//!
//! Server:
//!
//! ```no_run
//! use skiff::{listen, OpCode};
//!
//! #[tokio::main]
//! async fn main() -> skiff::Result<()> {
//!     listen("127.0.0.1:8080", "/chat", |mut conn| async move {
//!         while let Ok((opcode, payload)) = conn.receive().await {
//!             if opcode == OpCode::Text {
//!                 println!("{}", String::from_utf8_lossy(&payload));
//!             }
//!         }
//!     })
//!     .await
//! }
//! ```
//!
//! Client:
//!
//! ```no_run
//! use skiff::OpCode;
//!
//! #[tokio::main]
//! async fn main() -> skiff::Result<()> {
//!     let mut conn = skiff::dial("ws://127.0.0.1:8080/chat").await?;
//!     conn.send(OpCode::Text, b"Hello Websocket World!").await?;
//!     let (opcode, payload) = conn.receive().await?;
//!     println!("{:?}: {} bytes", opcode, payload.len());
//!     conn.close().await
//! }
//! ```

pub mod close;
pub mod frame;
pub mod handshake;
mod mask;

mod client;
mod conn;
mod handler;
mod reader;
mod server;
mod writer;

use thiserror::Error;

pub use client::{dial, dial_with_options};
pub use conn::{Connection, Options, Role, MAX_PAYLOAD_READ};
pub use frame::{FrameHeader, OpCode};
pub use reader::MessageReader;
pub use server::{listen, listen_with_options, Listener};
pub use writer::MessageWriter;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The variants fall into a few broad groups:
///
/// - Protocol errors: the peer violated RFC 6455 framing rules. On the
///   receive path these trigger a Close frame with status 1002 before the
///   error is surfaced.
/// - Handshake errors: the HTTP upgrade failed validation on either side.
/// - Invariant errors: the local caller misused the API (e.g. wrote a
///   different number of bytes than it declared).
/// - I/O and connection-state errors.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Reserved bits in the frame header are set. With no extension
    /// negotiated, RSV1-3 must all be zero.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// Receipt of a frame whose opcode is not one defined by RFC 6455.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A control frame (close, ping, or pong) was received with the FIN bit
    /// clear. Control frames must not be fragmented.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame declared a payload longer than 125 bytes.
    #[error("Control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    /// The 64-bit extended payload length had its most significant bit set.
    #[error("Most significant bit of 64-bit payload length must be zero")]
    LengthMostSignificantBitSet,

    /// A server received a frame the client failed to mask.
    #[error("Received unmasked frame from client")]
    UnmaskedFrame,

    /// A client received a frame the server masked.
    #[error("Received masked frame from server")]
    MaskedFrame,

    /// A continuation frame arrived without a preceding non-final data
    /// frame, or a new data frame interrupted an unfinished message.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// A received frame or reassembled message exceeds the configured
    /// maximum payload size.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A close frame carried a one-byte payload, which cannot hold a
    /// status code.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A close reason was not valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// The HTTP upgrade failed. `status` is the code reported to the peer
    /// (or received from it), `reason` a human-readable explanation.
    #[error("Handshake failed ({status}): {reason}")]
    Handshake {
        /// HTTP status associated with the failure.
        status: u16,
        /// Human-readable reason, also sent to the peer on the server side.
        reason: String,
    },

    /// The client received an HTTP status other than 101 Switching
    /// Protocols in response to its upgrade request.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Returned when attempting to establish a WebSocket connection with a
    /// URL scheme other than `ws://`.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The number of payload bytes written through a [`MessageWriter`]
    /// does not match the length declared in the frame header.
    #[error("Declared payload length {declared} but wrote {written} bytes")]
    PayloadLengthMismatch {
        /// Length announced in the frame header.
        declared: u64,
        /// Bytes actually written by the caller.
        written: u64,
    },

    /// The opcode passed to a send operation cannot start a message
    /// (continuation frames are produced internally, never sent directly).
    #[error("Opcode {0:?} is not valid for send")]
    InvalidSendOpCode(OpCode),

    /// Operation attempted on a connection that has already sent or
    /// received a Close frame.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Wraps errors from URL parsing that may occur when processing
    /// WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps standard I/O errors, including read/write timeouts.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WebSocketError {
    /// Close status to answer with before surfacing this error, if the
    /// error warrants a close handshake at all.
    pub(crate) fn close_code(&self) -> Option<close::CloseCode> {
        use close::CloseCode;

        match self {
            WebSocketError::ReservedBitsNotZero
            | WebSocketError::InvalidOpCode(_)
            | WebSocketError::ControlFrameFragmented
            | WebSocketError::ControlFrameTooLarge
            | WebSocketError::LengthMostSignificantBitSet
            | WebSocketError::UnmaskedFrame
            | WebSocketError::MaskedFrame
            | WebSocketError::InvalidContinuationFrame
            | WebSocketError::InvalidCloseFrame => Some(CloseCode::Protocol),
            WebSocketError::InvalidUTF8 => Some(CloseCode::Invalid),
            WebSocketError::FrameTooLarge => Some(CloseCode::Size),
            _ => None,
        }
    }
}
