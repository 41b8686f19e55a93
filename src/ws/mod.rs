//! WebSocket upgrade, framing, and broadcast support (RFC 6455).

pub(crate) mod broadcast;
pub(crate) mod frame;
pub(crate) mod session;

pub use frame::{CloseCode, OpCode};
pub(crate) use broadcast::Broadcast;
pub(crate) use session::{Outcome, Session};

use crate::Request;

/// Checks whether `req` carries a well-formed WebSocket upgrade handshake
/// (RFC 6455, Section 4.2.1): `Upgrade: websocket`, `Sec-WebSocket-Version:
/// 13`, `Connection: Upgrade`, and non-empty `Host`/`Sec-WebSocket-Key`.
///
/// Does not check whether a handler is registered for the resource; the
/// connection loop only accepts the upgrade when this returns `true` AND
/// its own WebSocket routing table has an entry for the request path.
pub(crate) fn is_upgrade_request(req: &Request) -> bool {
    header_eq(req, b"upgrade", b"websocket")
        && header_eq(req, b"sec-websocket-version", b"13")
        && header_eq(req, b"connection", b"upgrade")
        && !req.header(b"host").unwrap_or(b"").is_empty()
        && !req.header(b"sec-websocket-key").unwrap_or(b"").is_empty()
}

fn header_eq(req: &Request, name: &[u8], expected: &[u8]) -> bool {
    req.header(name)
        .is_some_and(|value| value.eq_ignore_ascii_case(expected))
}

/// Builds the `101 Switching Protocols` response line and headers for a
/// validated upgrade request.
pub(crate) fn handshake_response(client_key: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    out.extend_from_slice(b"upgrade: websocket\r\n");
    out.extend_from_slice(b"connection: Upgrade\r\n");
    out.extend_from_slice(b"sec-websocket-accept: ");
    out.extend_from_slice(frame::accept_key(client_key).as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ReqLimits;

    #[test]
    fn handshake_response_matches_spec_vector() {
        let mut out = Vec::new();
        handshake_response(b"AQIDBAUGBwgJCgsMDQ4PEA==", &mut out);

        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("sec-websocket-accept: 9bQuZIN64KrRsqgxDR9V4beMnUA=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn rejects_request_missing_upgrade_header() {
        let req = Request::new(&ReqLimits::default());
        assert!(!is_upgrade_request(&req));
    }
}
