//! HTTP/1.1 upgrade handshake (RFC 6455 section 4).
//!
//! The boundary between HTTP and the framing core: a deliberately minimal
//! request/response parser that validates the upgrade, derives the
//! `Sec-WebSocket-Accept` value, and hands the raw stream over. Everything
//! here operates on the head bytes only; frame bytes that follow the head
//! stay in the connection's buffered reader.
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Origin: http://example.com
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use std::collections::HashMap;

use base64::prelude::*;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{Result, WebSocketError};

/// RFC 6455 GUID concatenated with the client key for the accept hash.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of a request or response head.
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Computes the `Sec-WebSocket-Accept` value for a client key.
///
/// Standard base64 of `SHA1(key ++ GUID)`. The alphabet matters: URL-safe
/// base64 produces a value peers reject.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Generates a random 16-byte `Sec-WebSocket-Key`, base64 encoded.
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(nonce)
}

fn handshake_error(status: u16, reason: impl Into<String>) -> WebSocketError {
    WebSocketError::Handshake {
        status,
        reason: reason.into(),
    }
}

/// Reads a full HTTP head (request or status line plus headers) from the
/// buffered stream, up to and including the terminating blank line. Bytes
/// past the blank line are left in the reader's buffer.
pub(crate) async fn read_head<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::new();
    loop {
        let start = head.len();
        let n = reader.read_until(b'\n', &mut head).await?;
        if n == 0 {
            return Err(WebSocketError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed during handshake",
            )));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(handshake_error(400, "Request head too large"));
        }

        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            return Ok(head);
        }
    }
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }
    headers
}

/// A parsed client upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    /// HTTP method; must be GET for an upgrade.
    pub method: String,
    /// Request path.
    pub path: String,
    /// HTTP version as (major, minor).
    pub version: (u8, u8),
    headers: HashMap<String, String>,
}

impl UpgradeRequest {
    /// Parses a request head.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| handshake_error(400, "Request is not valid UTF-8"))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| handshake_error(400, "Empty request"))?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| handshake_error(400, "Missing request method"))?
            .to_owned();
        let path = parts
            .next()
            .ok_or_else(|| handshake_error(400, "Missing request path"))?
            .to_owned();
        let version = match parts.next() {
            Some("HTTP/1.0") => (1, 0),
            Some("HTTP/1.1") => (1, 1),
            Some(other) => other
                .strip_prefix("HTTP/")
                .and_then(|v| v.split_once('.'))
                .and_then(|(major, minor)| Some((major.parse().ok()?, minor.parse().ok()?)))
                .ok_or_else(|| handshake_error(400, "Malformed HTTP version"))?,
            None => return Err(handshake_error(400, "Missing HTTP version")),
        };

        Ok(Self {
            method,
            path,
            version,
            headers: parse_headers(lines),
        })
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Validates the upgrade request and returns the accept value for the
    /// `101` response.
    ///
    /// Checks, in order: method, HTTP version, `Host`, `Upgrade`,
    /// `Connection`, `Sec-WebSocket-Key` (must decode to exactly 16
    /// bytes), `Origin`, and `Sec-WebSocket-Version`.
    pub fn validate(&self) -> Result<String> {
        if self.method != "GET" {
            return Err(handshake_error(400, "Unsupported request method"));
        }

        if self.version < (1, 1) {
            return Err(handshake_error(400, "Unsupported protocol version"));
        }

        if self.header("host").is_none() {
            return Err(handshake_error(400, "Missing required HTTP header Host"));
        }

        let upgrade = self
            .header("upgrade")
            .ok_or_else(|| handshake_error(400, "Missing required HTTP header Upgrade"))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(handshake_error(400, "Unsupported value for header Upgrade"));
        }

        let connection = self
            .header("connection")
            .ok_or_else(|| handshake_error(400, "Missing required HTTP header Connection"))?;
        if !header_contains_token(connection, "upgrade") {
            return Err(handshake_error(
                400,
                "Unsupported value for header Connection",
            ));
        }

        let key = self.header("sec-websocket-key").ok_or_else(|| {
            handshake_error(400, "Missing required HTTP header Sec-WebSocket-Key")
        })?;
        match BASE64_STANDARD.decode(key) {
            Ok(decoded) if decoded.len() == 16 => {}
            _ => {
                return Err(handshake_error(
                    400,
                    "Unsupported value for header Sec-WebSocket-Key, \
                     expected 16 base64-encoded bytes",
                ))
            }
        }

        if self.header("origin").is_none() {
            return Err(handshake_error(400, "Missing required HTTP header Origin"));
        }

        let version = self.header("sec-websocket-version").ok_or_else(|| {
            handshake_error(400, "Missing required HTTP header Sec-WebSocket-Version")
        })?;
        if version != "13" {
            return Err(handshake_error(
                400,
                "Unsupported HTTP header value for Sec-WebSocket-Version, expected 13",
            ));
        }

        Ok(accept_key(key))
    }
}

/// Case-insensitive token scan for comma-separated header values, so
/// `Connection: keep-alive, Upgrade` validates.
fn header_contains_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// A parsed server response to an upgrade request.
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub reason: String,
    headers: HashMap<String, String>,
}

impl UpgradeResponse {
    /// Parses a response head.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| handshake_error(400, "Response is not valid UTF-8"))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| handshake_error(400, "Empty response"))?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next();
        let status = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| handshake_error(400, "Malformed status line"))?;
        let reason = parts.next().unwrap_or("").to_owned();

        Ok(Self {
            status,
            reason,
            headers: parse_headers(lines),
        })
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Validates a `101` response against the key the client sent.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.status != 101 {
            return Err(WebSocketError::InvalidStatusCode(self.status));
        }

        let accept = self.header("sec-websocket-accept").ok_or_else(|| {
            handshake_error(101, "Missing required HTTP header Sec-WebSocket-Accept")
        })?;
        let expected = accept_key(key);
        if accept != expected {
            return Err(handshake_error(
                101,
                format!(
                    "Invalid Sec-WebSocket-Accept: expected {expected}, got {accept}"
                ),
            ));
        }

        Ok(())
    }
}

/// Serializes the client upgrade request.
pub(crate) fn request_bytes(path: &str, host: &str, origin: &str, key: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Origin: {origin}\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
    .into_bytes()
}

/// Serializes the `101 Switching Protocols` response.
pub(crate) fn response_101(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .into_bytes()
}

/// Serializes an error response carrying the reason as its body.
pub(crate) fn response_error(status: u16, status_text: &str, reason: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {reason}",
        reason.len()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REQUEST: &str = "GET /chat HTTP/1.1\r\n\
         Host: server.example.com\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Origin: http://example.com\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n";

    #[test]
    fn test_accept_key_rfc_vector() {
        // RFC 6455 section 1.3 handshake example.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generate_key_decodes_to_16_bytes() {
        let key = generate_key();
        let decoded = BASE64_STANDARD.decode(&key).expect("valid base64");
        assert_eq!(decoded.len(), 16);
    }

    #[test]
    fn test_parse_and_validate_request() {
        let request = UpgradeRequest::parse(SAMPLE_REQUEST.as_bytes()).expect("parse");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/chat");
        assert_eq!(request.version, (1, 1));
        assert_eq!(request.header("HOST"), Some("server.example.com"));

        let accept = request.validate().expect("validate");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_validate_rejects_missing_headers() {
        for header in [
            "Host",
            "Upgrade",
            "Connection",
            "Origin",
            "Sec-WebSocket-Key",
            "Sec-WebSocket-Version",
        ] {
            let stripped: String = SAMPLE_REQUEST
                .lines()
                .filter(|line| !line.starts_with(header))
                .flat_map(|line| [line, "\r\n"])
                .collect();

            let request = UpgradeRequest::parse(stripped.as_bytes()).expect("parse");
            match request.validate() {
                Err(WebSocketError::Handshake { status: 400, reason }) => {
                    assert!(
                        reason.contains(header),
                        "reason {reason:?} should name {header}"
                    );
                }
                other => panic!("expected 400 for missing {header}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_method_and_version() {
        let post = SAMPLE_REQUEST.replacen("GET", "POST", 1);
        let request = UpgradeRequest::parse(post.as_bytes()).expect("parse");
        assert!(matches!(
            request.validate(),
            Err(WebSocketError::Handshake { status: 400, .. })
        ));

        let old = SAMPLE_REQUEST.replacen("HTTP/1.1", "HTTP/1.0", 1);
        let request = UpgradeRequest::parse(old.as_bytes()).expect("parse");
        assert!(matches!(
            request.validate(),
            Err(WebSocketError::Handshake { status: 400, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_short_key() {
        let bad = SAMPLE_REQUEST.replacen(
            "dGhlIHNhbXBsZSBub25jZQ==",
            "c2hvcnQ=", // "short"
            1,
        );
        let request = UpgradeRequest::parse(bad.as_bytes()).expect("parse");
        assert!(matches!(
            request.validate(),
            Err(WebSocketError::Handshake { status: 400, .. })
        ));
    }

    #[test]
    fn test_connection_header_token_list() {
        let keep_alive = SAMPLE_REQUEST.replacen(
            "Connection: Upgrade",
            "Connection: keep-alive, Upgrade",
            1,
        );
        let request = UpgradeRequest::parse(keep_alive.as_bytes()).expect("parse");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_response_round_trip() {
        let bytes = response_101("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let response = UpgradeResponse::parse(&bytes).expect("parse");

        assert_eq!(response.status, 101);
        assert_eq!(response.reason, "Switching Protocols");
        response
            .validate("dGhlIHNhbXBsZSBub25jZQ==")
            .expect("validate");
    }

    #[test]
    fn test_response_wrong_accept_rejected() {
        let bytes = response_101("bm90IHRoZSByaWdodCBoYXNo");
        let response = UpgradeResponse::parse(&bytes).expect("parse");
        assert!(matches!(
            response.validate("dGhlIHNhbXBsZSBub25jZQ=="),
            Err(WebSocketError::Handshake { .. })
        ));
    }

    #[test]
    fn test_response_non_101_rejected() {
        let response =
            UpgradeResponse::parse(b"HTTP/1.1 400 Bad Request\r\n\r\n").expect("parse");
        assert!(matches!(
            response.validate("dGhlIHNhbXBsZSBub25jZQ=="),
            Err(WebSocketError::InvalidStatusCode(400))
        ));
    }

    #[tokio::test]
    async fn test_read_head_stops_at_blank_line() {
        let mut data: Vec<u8> = SAMPLE_REQUEST.as_bytes().to_vec();
        data.extend_from_slice(&[0x81, 0x00]); // frame bytes after the head

        let mut reader = tokio::io::BufReader::new(&data[..]);
        let head = read_head(&mut reader).await.expect("read head");
        assert_eq!(head, SAMPLE_REQUEST.as_bytes());
    }

    #[tokio::test]
    async fn test_read_head_rejects_oversized() {
        let mut data = b"GET / HTTP/1.1\r\n".to_vec();
        data.extend(std::iter::repeat(b"X-Filler: junk\r\n").take(1024).flatten());

        let mut reader = tokio::io::BufReader::new(&data[..]);
        assert!(matches!(
            read_head(&mut reader).await,
            Err(WebSocketError::Handshake { status: 400, .. })
        ));
    }
}
