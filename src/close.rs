//! Close status codes and close-frame payloads (RFC 6455 section 7.4).
//!
//! A close payload is either empty or starts with a network-order u16
//! status code followed by a UTF-8 reason string.

use crate::{Result, WebSocketError};

/// Status code carried in a Close frame.
///
/// The named variants cover the 1000-series codes defined by RFC 6455;
/// everything else round-trips through [`CloseCode::Other`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: endpoint is going away.
    Away,
    /// 1002: protocol error.
    Protocol,
    /// 1003: received data it cannot accept.
    Unsupported,
    /// 1005: reserved, no status code was present.
    Status,
    /// 1006: reserved, abnormal closure without a close frame.
    Abnormal,
    /// 1007: payload inconsistent with the message type (e.g. bad UTF-8).
    Invalid,
    /// 1008: message violates endpoint policy.
    Policy,
    /// 1009: message too big to process.
    Size,
    /// 1010: client expected an extension the server did not negotiate.
    Extension,
    /// 1011: server encountered an unexpected condition.
    Error,
    /// Any other status code.
    Other(u16),
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            other => CloseCode::Other(other),
        }
    }
}

/// Builds a close payload from a status code and reason string.
pub fn close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Parses a received close payload into its status code and reason.
///
/// An empty payload is legal and carries no status. A one-byte payload
/// cannot hold a status code and is a protocol violation. The reason must
/// be valid UTF-8.
pub fn parse_close_payload(payload: &[u8]) -> Result<(Option<CloseCode>, String)> {
    match payload.len() {
        0 => Ok((None, String::new())),
        1 => Err(WebSocketError::InvalidCloseFrame),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| WebSocketError::InvalidUTF8)?
                .to_owned();
            Ok((Some(CloseCode::from(code)), reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_conversions_round_trip() {
        for code in 1000..1012 {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(4000), CloseCode::Other(4000));
        assert_eq!(u16::from(CloseCode::Other(4000)), 4000);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = close_payload(CloseCode::Normal, "bye");
        assert_eq!(payload, vec![0x03, 0xE8, b'b', b'y', b'e']);

        let (code, reason) = parse_close_payload(&payload).expect("parse");
        assert_eq!(code, Some(CloseCode::Normal));
        assert_eq!(reason, "bye");
    }

    #[test]
    fn test_empty_payload_has_no_status() {
        let (code, reason) = parse_close_payload(&[]).expect("parse");
        assert_eq!(code, None);
        assert!(reason.is_empty());
    }

    #[test]
    fn test_one_byte_payload_rejected() {
        assert!(matches!(
            parse_close_payload(&[0x03]),
            Err(WebSocketError::InvalidCloseFrame)
        ));
    }

    #[test]
    fn test_invalid_utf8_reason_rejected() {
        assert!(matches!(
            parse_close_payload(&[0x03, 0xE8, 0xFF, 0xFE]),
            Err(WebSocketError::InvalidUTF8)
        ));
    }
}
