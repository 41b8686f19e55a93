//! RFC 6455 frame encoding/decoding and handshake key derivation.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
pub(crate) fn accept_key(client_key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key);
    hasher.update(GUID);
    STANDARD.encode(hasher.finalize())
}

/// WebSocket frame opcode (RFC 6455, Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    const fn as_byte(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Close status code sent in a close frame (RFC 6455, Section 7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    ProtocolError,
    Overflow,
    Error,
}

impl CloseCode {
    pub(crate) const fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::Overflow => 1009,
            Self::Error => 1011,
        }
    }
}

/// A decoded frame header plus the bounds of its (already unmasked) payload
/// inside the buffer passed to [`decode`].
pub(crate) struct DecodedFrame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) payload_start: usize,
    pub(crate) payload_end: usize,
    /// Total bytes this frame occupies in the source buffer, header included.
    pub(crate) total_len: usize,
}

pub(crate) enum Decoded {
    Incomplete,
    Invalid,
    Frame(DecodedFrame),
}

/// Parses one client-to-server frame from the front of `buf`, unmasking its
/// payload in place. Returns [`Decoded::Incomplete`] when `buf` doesn't yet
/// hold a full frame; the caller should read more bytes and retry.
pub(crate) fn decode(buf: &mut [u8]) -> Decoded {
    if buf.len() < 2 {
        return Decoded::Incomplete;
    }

    let fin = buf[0] & 0b1000_0000 != 0;
    let rsv = buf[0] & 0b0111_0000;
    let Some(opcode) = OpCode::from_byte(buf[0] & 0b0000_1111) else {
        return Decoded::Invalid;
    };
    if rsv != 0 {
        return Decoded::Invalid;
    }

    let masked = buf[1] & 0b1000_0000 != 0;
    if !masked {
        // Every client frame MUST be masked.
        return Decoded::Invalid;
    }

    let len_bits = buf[1] & 0b0111_1111;
    let (payload_len, header_len): (u64, usize) = match len_bits {
        126 => {
            if buf.len() < 4 {
                return Decoded::Incomplete;
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Decoded::Incomplete;
            }
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(arr);
            if len & 0x8000_0000_0000_0000 != 0 {
                return Decoded::Invalid;
            }
            (len, 10)
        }
        n => (n as u64, 2),
    };

    if opcode.is_control() && (!fin || payload_len > 125) {
        return Decoded::Invalid;
    }

    let mask_start = header_len;
    let payload_start = mask_start + 4;
    let Some(total_len) = payload_start.checked_add(payload_len as usize) else {
        return Decoded::Invalid;
    };
    if buf.len() < total_len {
        return Decoded::Incomplete;
    }

    let mask = [
        buf[mask_start],
        buf[mask_start + 1],
        buf[mask_start + 2],
        buf[mask_start + 3],
    ];
    for (i, byte) in buf[payload_start..total_len].iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Decoded::Frame(DecodedFrame {
        fin,
        opcode,
        payload_start,
        payload_end: total_len,
        total_len,
    })
}

/// Appends an unmasked server-to-client frame header (RFC 6455, Section 5.2)
/// for `payload_len` bytes of `opcode` data.
pub(crate) fn encode_header(opcode: OpCode, fin: bool, payload_len: usize, out: &mut Vec<u8>) {
    let first = (if fin { 0b1000_0000 } else { 0 }) | opcode.as_byte();
    out.push(first);

    if payload_len < 126 {
        out.push(payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
}

/// Builds a complete close frame with the given status code and no reason text.
pub(crate) fn encode_close(code: CloseCode, out: &mut Vec<u8>) {
    encode_header(OpCode::Close, true, 2, out);
    out.extend_from_slice(&code.as_u16().to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_spec_vector() {
        assert_eq!(
            accept_key(b"AQIDBAUGBwgJCgsMDQ4PEA=="),
            "9bQuZIN64KrRsqgxDR9V4beMnUA="
        );
    }

    fn masked_frame(opcode: OpCode, fin: bool, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        let mut buf = vec![(if fin { 0x80 } else { 0 }) | opcode.as_byte()];
        let len = payload.len();
        if len < 126 {
            buf.push(0x80 | len as u8);
        } else {
            buf.push(0x80 | 126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        }
        buf.extend_from_slice(&mask);
        for (i, &b) in payload.iter().enumerate() {
            buf.push(b ^ mask[i % 4]);
        }
        buf
    }

    #[test]
    fn decode_text_frame_unmasks_payload() {
        let mut buf = masked_frame(OpCode::Text, true, b"hello", [1, 2, 3, 4]);
        match decode(&mut buf) {
            Decoded::Frame(f) => {
                assert!(f.fin);
                assert_eq!(f.opcode, OpCode::Text);
                assert_eq!(&buf[f.payload_start..f.payload_end], b"hello");
                assert_eq!(f.total_len, buf.len());
            }
            _ => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = [0x81];
        assert!(matches!(decode(&mut buf), Decoded::Incomplete));
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut full = masked_frame(OpCode::Binary, true, b"0123456789", [9, 9, 9, 9]);
        full.truncate(full.len() - 3);
        assert!(matches!(decode(&mut full), Decoded::Incomplete));
    }

    #[test]
    fn decode_rejects_unmasked_client_frame() {
        let mut buf = vec![0x81, 0x05, b'h', b'e', b'l', b'l', b'o'];
        assert!(matches!(decode(&mut buf), Decoded::Invalid));
    }

    #[test]
    fn decode_rejects_fragmented_control_frame() {
        let mut buf = masked_frame(OpCode::Ping, false, b"hi", [1, 1, 1, 1]);
        assert!(matches!(decode(&mut buf), Decoded::Invalid));
    }

    #[test]
    fn decode_rejects_oversized_control_frame() {
        let payload = vec![0u8; 126];
        let mut buf = masked_frame(OpCode::Ping, true, &payload, [1, 1, 1, 1]);
        assert!(matches!(decode(&mut buf), Decoded::Invalid));
    }

    #[test]
    fn encode_header_picks_smallest_length_encoding() {
        let mut out = Vec::new();
        encode_header(OpCode::Text, true, 10, &mut out);
        assert_eq!(out, vec![0x81, 10]);

        let mut out = Vec::new();
        encode_header(OpCode::Binary, true, 200, &mut out);
        assert_eq!(out[..2], [0x82, 126]);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn encode_close_writes_status_code() {
        let mut out = Vec::new();
        encode_close(CloseCode::Normal, &mut out);
        assert_eq!(out, vec![0x88, 0x02, 0x03, 0xE8]);
    }
}
