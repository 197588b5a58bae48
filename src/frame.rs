//! Frame header codec (RFC 6455 section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! The header is 2 to 14 bytes: two fixed bytes, an optional 16- or 64-bit
//! extended length, and an optional 4-byte masking key. All multi-byte
//! length fields are network byte order.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Result, WebSocketError};

/// Largest possible frame header: 2 fixed bytes, 8 length bytes, 4 key bytes.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// Control frames must fit in a single frame of at most this many payload bytes.
pub(crate) const MAX_CONTROL_PAYLOAD: u64 = 125;

/// WebSocket operation code (OpCode) that determines the semantic meaning
/// and handling of a frame.
///
/// Data frames (`Continuation`, `Text`, `Binary`) carry application payload
/// and may span frames via fragmentation. Control frames (`Close`, `Ping`,
/// `Pong`) manage the connection, must be final, and are limited to 125
/// payload bytes.
///
/// The numeric values are defined in RFC 6455, section 11.8; the ranges
/// 0x3-0x7 and 0xB-0xF are reserved and rejected on receive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame
    /// (`Close`, `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A decoded WebSocket frame header.
///
/// Carries everything the framing layer needs to consume or produce the
/// payload that follows: finality, opcode, the masking key (present iff the
/// frame is masked), and the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Indicates this frame is the final fragment of its message.
    pub fin: bool,
    /// Reserved bit 1. Zero unless an extension is negotiated; none are.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// Masking key, present iff the payload is masked.
    pub mask: Option<[u8; 4]>,
    /// Number of payload bytes that follow the header.
    pub payload_length: u64,
}

impl FrameHeader {
    /// Creates a header with all reserved bits clear.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload_length: u64) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask,
            payload_length,
        }
    }

    /// Returns whether the payload is masked.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Decodes a frame header from the byte stream.
    ///
    /// Reads the two fixed bytes, then the extended payload length and the
    /// masking key as announced. Fails with a protocol error on reserved
    /// bits, unknown opcodes, fragmented or oversized control frames, and a
    /// 64-bit length with the top bit set.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut fixed = [0u8; 2];
        reader.read_exact(&mut fixed).await?;

        let fin = fixed[0] & 0x80 != 0;
        if fixed[0] & 0x70 != 0 {
            return Err(WebSocketError::ReservedBitsNotZero);
        }
        let opcode = OpCode::try_from(fixed[0] & 0x0F)?;

        let masked = fixed[1] & 0x80 != 0;
        let length_code = fixed[1] & 0x7F;

        let payload_length = match length_code {
            126 => {
                let mut ext = [0u8; 2];
                reader.read_exact(&mut ext).await?;
                u64::from(u16::from_be_bytes(ext))
            }
            127 => {
                let mut ext = [0u8; 8];
                reader.read_exact(&mut ext).await?;
                if ext[0] & 0x80 != 0 {
                    return Err(WebSocketError::LengthMostSignificantBitSet);
                }
                u64::from_be_bytes(ext)
            }
            n => u64::from(n),
        };

        let mask = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        if opcode.is_control() {
            if !fin {
                return Err(WebSocketError::ControlFrameFragmented);
            }
            if payload_length > MAX_CONTROL_PAYLOAD {
                return Err(WebSocketError::ControlFrameTooLarge);
            }
        }

        Ok(Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask,
            payload_length,
        })
    }

    /// Formats the header into the provided `head` buffer and returns the
    /// number of bytes written.
    ///
    /// The length encoding is chosen by threshold: up to 125 inline, up to
    /// 65535 as `126` plus a big-endian u16, above that as `127` plus a
    /// big-endian u64.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload_length;
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&len.to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }

    /// Encodes the header into a fresh vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = [0u8; MAX_HEAD_SIZE];
        let size = self.fmt_head(&mut head);
        head[..size].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<FrameHeader> {
        let mut reader = bytes;
        FrameHeader::read_from(&mut reader).await
    }

    #[test]
    fn test_opcode_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());

        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn test_opcode_try_from_invalid() {
        for code in [0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert!(matches!(
                OpCode::try_from(code),
                Err(WebSocketError::InvalidOpCode(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_round_trip_length_thresholds() {
        for len in [0, 1, 125, 126, 65535, 65536, 1 << 32, (1 << 63) - 1] {
            let header = FrameHeader::new(true, OpCode::Binary, None, len);
            let encoded = header.to_bytes();
            let decoded = decode(&encoded).await.expect("decode");
            assert_eq!(decoded, header, "length {}", len);
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_mask() {
        let header = FrameHeader::new(true, OpCode::Text, Some([0xDE, 0xAD, 0xBE, 0xEF]), 300);
        let decoded = decode(&header.to_bytes()).await.expect("decode");
        assert_eq!(decoded, header);
    }

    #[tokio::test]
    async fn test_decode_short_masked_text() {
        // Masked "Hello" header from RFC 6455 section 5.7.
        let header = decode(&[0x81, 0x85, 0x37, 0xFA, 0x21, 0x3D]).await.expect("decode");

        assert!(header.fin);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.mask, Some([0x37, 0xFA, 0x21, 0x3D]));
        assert_eq!(header.payload_length, 5);
    }

    #[test]
    fn test_encode_medium_length_form() {
        // 200-byte unmasked binary frame uses the 126 length form.
        let header = FrameHeader::new(true, OpCode::Binary, None, 200);
        assert_eq!(header.to_bytes(), vec![0x82, 0x7E, 0x00, 0xC8]);
    }

    #[test]
    fn test_encode_large_length_form() {
        let header = FrameHeader::new(true, OpCode::Binary, None, 65536);
        assert_eq!(
            header.to_bytes(),
            vec![0x82, 0x7F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[tokio::test]
    async fn test_reserved_bits_rejected() {
        for first in [0xC1, 0xA1, 0x91] {
            assert!(matches!(
                decode(&[first, 0x00]).await,
                Err(WebSocketError::ReservedBitsNotZero)
            ));
        }
    }

    #[tokio::test]
    async fn test_unknown_opcode_rejected() {
        assert!(matches!(
            decode(&[0x83, 0x00]).await,
            Err(WebSocketError::InvalidOpCode(0x3))
        ));
    }

    #[tokio::test]
    async fn test_fragmented_control_rejected() {
        // Ping with FIN clear.
        assert!(matches!(
            decode(&[0x09, 0x00]).await,
            Err(WebSocketError::ControlFrameFragmented)
        ));
    }

    #[tokio::test]
    async fn test_oversized_control_rejected() {
        // Close announcing 126 payload bytes.
        assert!(matches!(
            decode(&[0x88, 0x7E, 0x00, 0x7E]).await,
            Err(WebSocketError::ControlFrameTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_length_top_bit_rejected() {
        let bytes = [0x82, 0x7F, 0x80, 0, 0, 0, 0, 0, 0, 1];
        assert!(matches!(
            decode(&bytes).await,
            Err(WebSocketError::LengthMostSignificantBitSet)
        ));
    }

    #[tokio::test]
    async fn test_truncated_header_is_io_error() {
        assert!(matches!(
            decode(&[0x81]).await,
            Err(WebSocketError::Io(_))
        ));
    }
}
