//! RFC 6455 WebSocket support: the upgrade handshake and the frame codec
//! used once a connection has switched protocols.
//!
//! Grounded on `examples/original_source/src/onion/websocket.c`: the magic
//! GUID, the requirement for `Sec-WebSocket-Version: 13`, and the rule
//! that server frames are always sent unmasked and unfragmented are all
//! carried over from that implementation (see DESIGN.md's Open Question
//! decisions for the fragmentation/masking call).

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::dict::Dict;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A message handler installed on an `HttpResponse` by a route that
/// returns `ConnectionStatus::WebSocket` — invoked once per complete
/// text/binary frame after the upgrade completes, returning bytes to
/// write back (if any). Control frames (ping/pong/close) never reach
/// this callback; `http_connection.rs` answers those itself.
pub type MessageHandler = dyn Fn(&[u8], Opcode) -> Option<Vec<u8>> + Send + Sync;

#[derive(Debug)]
pub enum HandshakeError {
    MissingUpgradeHeader,
    MissingKey,
    UnsupportedVersion(String),
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::MissingUpgradeHeader => write!(f, "missing or non-websocket Upgrade header"),
            HandshakeError::MissingKey => write!(f, "missing Sec-WebSocket-Key header"),
            HandshakeError::UnsupportedVersion(v) => write!(f, "unsupported Sec-WebSocket-Version: {v}"),
        }
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a given client-supplied
/// `Sec-WebSocket-Key`: `base64(sha1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Validates the incoming request headers (case-insensitive `headers`
/// dict) against the upgrade contract and returns the computed accept
/// key plus the echoed sub-protocol, if one was requested and accepted.
pub fn negotiate(headers: &Dict, requested_protocols: &[&str]) -> Result<(String, Option<String>), HandshakeError> {
    let upgrade = headers.get("upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::MissingUpgradeHeader);
    }

    let key = headers.get("sec-websocket-key").ok_or(HandshakeError::MissingKey)?;

    let version = headers.get("sec-websocket-version").unwrap_or_default();
    if version != "13" {
        return Err(HandshakeError::UnsupportedVersion(version));
    }

    let protocol = headers.get("sec-websocket-protocol").and_then(|requested| {
        requested
            .split(',')
            .map(|p| p.trim())
            .find(|p| requested_protocols.contains(p))
            .map(|p| p.to_string())
    });

    Ok((accept_key(&key), protocol))
}

/// WebSocket opcodes (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_raw(raw: u8) -> Option<Opcode> {
        match raw {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub enum FrameError {
    NeedMoreData,
    UnknownOpcode(u8),
    UnmaskedClientFrame,
    PayloadTooLarge,
}

/// Maximum single-frame payload this implementation will accept from a
/// client before giving up — a deliberately conservative bound so a
/// malicious/buggy peer cannot force an unbounded allocation from a single
/// 64-bit length prefix.
pub const MAX_FRAME_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Attempts to parse one frame from the front of `buf`. On success,
/// returns the frame and how many bytes of `buf` it consumed. Per RFC
/// 6455 every client→server frame MUST be masked; an unmasked one is a
/// protocol error.
pub fn read_frame(buf: &[u8]) -> Result<(Frame, usize), FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::NeedMoreData);
    }
    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_raw(buf[0] & 0x0F).ok_or(FrameError::UnknownOpcode(buf[0] & 0x0F))?;
    let masked = buf[1] & 0x80 != 0;
    if !masked {
        return Err(FrameError::UnmaskedClientFrame);
    }
    let mut len = (buf[1] & 0x7F) as u64;
    let mut cursor = 2usize;

    if len == 126 {
        if buf.len() < cursor + 2 {
            return Err(FrameError::NeedMoreData);
        }
        len = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]) as u64;
        cursor += 2;
    } else if len == 127 {
        if buf.len() < cursor + 8 {
            return Err(FrameError::NeedMoreData);
        }
        len = u64::from_be_bytes(buf[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
    }

    if len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::PayloadTooLarge);
    }

    if buf.len() < cursor + 4 {
        return Err(FrameError::NeedMoreData);
    }
    let mask = [buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]];
    cursor += 4;

    let len = len as usize;
    if buf.len() < cursor + len {
        return Err(FrameError::NeedMoreData);
    }

    let mut payload = buf[cursor..cursor + len].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
    cursor += len;

    Ok((Frame { fin, opcode, payload }, cursor))
}

/// Encodes a server→client frame. Per the redesign decision recorded in
/// DESIGN.md, server writes are always unmasked and always a single frame
/// (`fin = true`), matching the original implementation's behavior.
pub fn write_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | opcode.to_raw());

    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    out.extend_from_slice(payload);
    out
}

pub fn write_text(text: &str) -> Vec<u8> {
    write_frame(Opcode::Text, text.as_bytes())
}

pub fn write_binary(data: &[u8]) -> Vec<u8> {
    write_frame(Opcode::Binary, data)
}

pub fn write_ping(payload: &[u8]) -> Vec<u8> {
    write_frame(Opcode::Ping, payload)
}

pub fn write_pong(payload: &[u8]) -> Vec<u8> {
    write_frame(Opcode::Pong, payload)
}

/// A close frame with an optional status code + reason, per RFC 6455
/// §5.5.1 (status code as the first two payload bytes, big-endian).
pub fn write_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    write_frame(Opcode::Close, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // RFC 6455 section 1.3 worked example.
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn negotiate_rejects_missing_upgrade() {
        let headers = Dict::new_icase();
        headers.set("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        headers.set("sec-websocket-version", "13");
        assert!(matches!(
            negotiate(&headers, &[]),
            Err(HandshakeError::MissingUpgradeHeader)
        ));
    }

    #[test]
    fn negotiate_rejects_wrong_version() {
        let headers = Dict::new_icase();
        headers.set("upgrade", "websocket");
        headers.set("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        headers.set("sec-websocket-version", "8");
        assert!(matches!(
            negotiate(&headers, &[]),
            Err(HandshakeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn negotiate_succeeds_and_echoes_protocol() {
        let headers = Dict::new_icase();
        headers.set("upgrade", "websocket");
        headers.set("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
        headers.set("sec-websocket-version", "13");
        headers.set("sec-websocket-protocol", "chat, superchat");
        let (accept, protocol) = negotiate(&headers, &["superchat"]).unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(protocol, Some("superchat".to_string()));
    }

    fn mask_payload(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect()
    }

    #[test]
    fn reads_masked_text_frame() {
        let mask = [0x12, 0x34, 0x56, 0x78];
        let masked_payload = mask_payload(b"hello", mask);
        let mut buf = vec![0x81, 0x80 | 5];
        buf.extend_from_slice(&mask);
        buf.extend_from_slice(&masked_payload);

        let (frame, consumed) = read_frame(&buf).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"hello");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn rejects_unmasked_client_frame() {
        let buf = vec![0x81, 0x05, b'h', b'e', b'l', b'l', b'o'];
        assert!(matches!(read_frame(&buf), Err(FrameError::UnmaskedClientFrame)));
    }

    #[test]
    fn needs_more_data_for_partial_frame() {
        let buf = vec![0x81];
        assert!(matches!(read_frame(&buf), Err(FrameError::NeedMoreData)));
    }

    #[test]
    fn write_frame_roundtrips_through_mask() {
        let server_frame = write_text("ping-pong");
        // Server frames are unmasked; confirm mask bit is clear.
        assert_eq!(server_frame[1] & 0x80, 0);
    }

    #[test]
    fn close_frame_encodes_status_code() {
        let frame = write_close(1000, "bye");
        assert_eq!(&frame[2..4], &1000u16.to_be_bytes());
        assert_eq!(&frame[4..], b"bye");
    }
}
