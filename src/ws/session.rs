//! Per-connection WebSocket frame assembly and message dispatch.
//!
//! Mirrors the incremental-parsing shape of [`crate::http::request`]: bytes
//! are fed in as they arrive off the socket, and the session reports back a
//! list of [`Outcome`]s without owning any I/O itself. The caller (the
//! connection's read loop) is responsible for writing replies and for
//! tearing the connection down on [`Outcome::Close`].

use crate::{
    limits::WsLimits,
    ws::frame::{self, CloseCode, Decoded, OpCode},
};

/// A unit of work produced by feeding bytes into a [`Session`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// A complete text/binary message, already reassembled across any
    /// continuation frames.
    Message { opcode: OpCode, payload: Vec<u8> },
    /// A ping was received; reply with a pong carrying the same payload.
    Pong { payload: Vec<u8> },
    /// The session must send a close frame with this code and terminate.
    Close(CloseCode),
}

struct Pending {
    opcode: OpCode,
    payload: Vec<u8>,
}

/// Assembles RFC 6455 frames for a single WebSocket connection.
pub(crate) struct Session {
    receive_buffer: Vec<u8>,
    pending: Option<Pending>,
    max_receive_buffer: usize,
    max_fragment_cache: usize,
}

impl Session {
    pub(crate) fn new(limits: &WsLimits) -> Self {
        Self {
            receive_buffer: Vec::new(),
            pending: None,
            max_receive_buffer: limits.max_receive_buffer,
            max_fragment_cache: limits.max_fragment_cache,
        }
    }

    /// Feeds newly-received bytes and returns every [`Outcome`] they produce,
    /// in order. A [`Outcome::Close`] is always the last entry; the caller
    /// must stop feeding the session after one is returned.
    pub(crate) fn feed(&mut self, data: &[u8]) -> Vec<Outcome> {
        if self.receive_buffer.len() + data.len() > self.max_receive_buffer {
            self.receive_buffer.clear();
            return vec![Outcome::Close(CloseCode::Overflow)];
        }
        self.receive_buffer.extend_from_slice(data);

        let mut outcomes = Vec::new();
        loop {
            match frame::decode(&mut self.receive_buffer) {
                Decoded::Incomplete => break,
                Decoded::Invalid => {
                    outcomes.push(Outcome::Close(CloseCode::ProtocolError));
                    self.receive_buffer.clear();
                    break;
                }
                Decoded::Frame(f) => {
                    let payload = self.receive_buffer[f.payload_start..f.payload_end].to_vec();
                    let total_len = f.total_len;
                    let stop = self.dispatch(f.fin, f.opcode, payload, &mut outcomes);
                    self.receive_buffer.drain(..total_len);
                    if stop {
                        break;
                    }
                }
            }
        }
        outcomes
    }

    /// Returns `true` if the session should stop processing further frames
    /// from this buffer (a close was requested).
    fn dispatch(
        &mut self,
        fin: bool,
        opcode: OpCode,
        payload: Vec<u8>,
        outcomes: &mut Vec<Outcome>,
    ) -> bool {
        match opcode {
            OpCode::Close => {
                outcomes.push(Outcome::Close(CloseCode::Normal));
                true
            }
            OpCode::Ping => {
                outcomes.push(Outcome::Pong { payload });
                false
            }
            OpCode::Pong => false,
            OpCode::Text | OpCode::Binary if fin && self.pending.is_none() => {
                outcomes.push(Outcome::Message { opcode, payload });
                false
            }
            OpCode::Text | OpCode::Binary if self.pending.is_none() => {
                self.pending = Some(Pending { opcode, payload });
                false
            }
            OpCode::Continuation => match &mut self.pending {
                None => {
                    outcomes.push(Outcome::Close(CloseCode::ProtocolError));
                    true
                }
                Some(pending) => {
                    if pending.payload.len() + payload.len() > self.max_fragment_cache {
                        self.pending = None;
                        outcomes.push(Outcome::Close(CloseCode::Overflow));
                        return true;
                    }
                    pending.payload.extend_from_slice(&payload);
                    if fin {
                        let Pending { opcode, payload } = self.pending.take().unwrap();
                        outcomes.push(Outcome::Message { opcode, payload });
                    }
                    false
                }
            },
            // A non-final Text/Binary frame while one is already pending is a
            // protocol violation: the peer must use Continuation.
            _ => {
                outcomes.push(Outcome::Close(CloseCode::ProtocolError));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masked(opcode: OpCode, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mask = [1u8, 2, 3, 4];
        let mut buf = vec![(if fin { 0x80 } else { 0 }) | match opcode {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }];
        buf.push(0x80 | payload.len() as u8);
        buf.extend_from_slice(&mask);
        for (i, &b) in payload.iter().enumerate() {
            buf.push(b ^ mask[i % 4]);
        }
        buf
    }

    #[test]
    fn single_frame_text_message() {
        let mut session = Session::new(&WsLimits::default());
        let outcomes = session.feed(&masked(OpCode::Text, true, b"hello"));
        assert_eq!(
            outcomes,
            vec![Outcome::Message {
                opcode: OpCode::Text,
                payload: b"hello".to_vec()
            }]
        );
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mut session = Session::new(&WsLimits::default());
        assert!(session.feed(&masked(OpCode::Text, false, b"hel")).is_empty());
        let outcomes = session.feed(&masked(OpCode::Continuation, true, b"lo"));
        assert_eq!(
            outcomes,
            vec![Outcome::Message {
                opcode: OpCode::Text,
                payload: b"hello".to_vec()
            }]
        );
    }

    #[test]
    fn ping_yields_pong() {
        let mut session = Session::new(&WsLimits::default());
        let outcomes = session.feed(&masked(OpCode::Ping, true, b"hi"));
        assert_eq!(
            outcomes,
            vec![Outcome::Pong {
                payload: b"hi".to_vec()
            }]
        );
    }

    #[test]
    fn close_frame_yields_normal_close() {
        let mut session = Session::new(&WsLimits::default());
        let outcomes = session.feed(&masked(OpCode::Close, true, b""));
        assert_eq!(outcomes, vec![Outcome::Close(CloseCode::Normal)]);
    }

    #[test]
    fn bytes_split_across_two_reads() {
        let mut session = Session::new(&WsLimits::default());
        let frame = masked(OpCode::Text, true, b"hello world");
        let (first, second) = frame.split_at(3);

        assert!(session.feed(first).is_empty());
        let outcomes = session.feed(second);
        assert_eq!(
            outcomes,
            vec![Outcome::Message {
                opcode: OpCode::Text,
                payload: b"hello world".to_vec()
            }]
        );
    }

    #[test]
    fn receive_buffer_overflow_closes() {
        let mut limits = WsLimits::default();
        limits.max_receive_buffer = 4;
        let mut session = Session::new(&limits);

        let outcomes = session.feed(b"too many bytes");
        assert_eq!(outcomes, vec![Outcome::Close(CloseCode::Overflow)]);
    }

    #[test]
    fn fragment_cache_overflow_closes() {
        let mut limits = WsLimits::default();
        limits.max_fragment_cache = 2;
        let mut session = Session::new(&limits);

        assert!(session.feed(&masked(OpCode::Text, false, b"ab")).is_empty());
        let outcomes = session.feed(&masked(OpCode::Continuation, true, b"cd"));
        assert_eq!(outcomes, vec![Outcome::Close(CloseCode::Overflow)]);
    }

    #[test]
    fn invalid_frame_closes_with_protocol_error() {
        let mut session = Session::new(&WsLimits::default());
        // unmasked client frame is invalid
        let outcomes = session.feed(&[0x81, 0x02, b'h', b'i']);
        assert_eq!(outcomes, vec![Outcome::Close(CloseCode::ProtocolError)]);
    }
}
