//! Message reassembly on top of the frame parser (C6, second half).
//!
//! Grounded on `original_source/core/include/core/websocket/
//! FrameParser.h`'s `m_isFragmented` handling, with
//! `infrastructure/core/include/core/ws/Message.h` as a secondary
//! cross-check for the text/binary/control message shape.

use crate::error::{Error, Result};
use crate::ws::close::CloseCode;
use crate::ws::frame::{Frame, FrameParser, OpCode};

/// The logical kind of a reassembled [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

/// A complete, reassembled WebSocket message. Text messages are
/// guaranteed to carry valid UTF-8 in `payload` by the time they are
/// yielded.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

struct Pending {
    kind: MessageKind,
    buffer: Vec<u8>,
}

/// Reassembles the incremental [`FrameParser`]'s output into complete
/// messages, enforcing the fragmentation and size rules from spec.md §4.6:
/// a data frame with `FIN=0` opens a message that only `CONTINUATION`
/// frames may extend; control frames may interleave between fragments
/// without disturbing them; the cumulative payload is capped at
/// `max_message_size`.
pub struct MessageParser {
    frames: FrameParser,
    pending: Option<Pending>,
    max_message_size: u64,
}

impl MessageParser {
    /// `require_masked` mirrors [`crate::ws::frame::FrameParser::new`]'s
    /// parameter: `Some(true)` for a server reading from its client,
    /// `Some(false)` for a client reading from its server, `None` to accept
    /// either (test-only).
    pub fn new(max_message_size: u64, require_masked: Option<bool>) -> Self {
        MessageParser {
            frames: FrameParser::new(max_message_size, require_masked),
            pending: None,
            max_message_size,
        }
    }

    /// Feeds `data` into the parser, draining as many complete messages as
    /// the input allows. `on_message` is called once per completed
    /// message, in arrival order -- control frames are yielded
    /// immediately, data frames only once their final fragment arrives.
    pub fn consume(&mut self, mut data: &[u8], mut on_message: impl FnMut(Message)) -> Result<()> {
        while !data.is_empty() {
            let (advanced, frame) = self.frames.consume(data)?;
            data = &data[advanced..];
            let Some(frame) = frame else {
                break;
            };
            if let Some(message) = self.accept_frame(frame)? {
                on_message(message);
            }
        }
        Ok(())
    }

    fn accept_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        let Frame { header, payload } = frame;

        if header.opcode.is_control() {
            let kind = match header.opcode {
                OpCode::Close => MessageKind::Close,
                OpCode::Ping => MessageKind::Ping,
                OpCode::Pong => MessageKind::Pong,
                _ => unreachable!("is_control implies one of the three above"),
            };
            return Ok(Some(Message { kind, payload }));
        }

        match (header.opcode, &mut self.pending) {
            (OpCode::Continuation, None) => {
                Err(Error::protocol(1002, "continuation frame without an open message"))
            }
            (OpCode::Continuation, Some(pending)) => {
                if (pending.buffer.len() as u64) + (payload.len() as u64) > self.max_message_size {
                    self.pending = None;
                    return Err(Error::protocol(1009, "message too big"));
                }
                pending.buffer.extend_from_slice(&payload);
                if header.fin {
                    let pending = self.pending.take().expect("checked Some above");
                    Ok(Some(self.finish(pending)?))
                } else {
                    Ok(None)
                }
            }
            (OpCode::Text | OpCode::Binary, None) => {
                let kind = if header.opcode == OpCode::Text { MessageKind::Text } else { MessageKind::Binary };
                if header.fin {
                    Ok(Some(self.finish(Pending { kind, buffer: payload })?))
                } else {
                    self.pending = Some(Pending { kind, buffer: payload });
                    Ok(None)
                }
            }
            (OpCode::Text | OpCode::Binary, Some(_)) => {
                Err(Error::protocol(1002, "data frame received while a fragmented message is open"))
            }
        }
    }

    fn finish(&self, pending: Pending) -> Result<Message> {
        if pending.kind == MessageKind::Text {
            if std::str::from_utf8(&pending.buffer).is_err() {
                return Err(Error::protocol(1007, "text message is not valid UTF-8"));
            }
        }
        Ok(Message { kind: pending.kind, payload: pending.buffer })
    }
}

/// Convenience used by the close-handling code paths: turns a
/// [`Message`] of kind [`MessageKind::Close`] into the decoded close code
/// and reason, per spec.md §4.7's default close handler.
pub fn close_code_of(message: &Message) -> std::result::Result<(Option<CloseCode>, Option<String>), CloseCode> {
    crate::ws::close::decode_close_payload(&message.payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::OpCode;

    fn frame_bytes(fin: bool, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![(if fin { 0x80 } else { 0 }) | opcode.as_raw()];
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn fragmented_text_reassembles_in_order() {
        let mut bytes = Vec::new();
        bytes.extend(frame_bytes(false, OpCode::Text, b"Hel"));
        bytes.extend(frame_bytes(false, OpCode::Continuation, b"lo wo"));
        bytes.extend(frame_bytes(true, OpCode::Continuation, b"rld"));

        let mut parser = MessageParser::new(1 << 20, None);
        let mut messages = Vec::new();
        parser.consume(&bytes, |m| messages.push(m)).unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Text);
        assert_eq!(messages[0].payload, b"Hello world");
    }

    #[test]
    fn ping_interleaved_in_a_fragmented_message_is_yielded_separately() {
        let mut bytes = Vec::new();
        bytes.extend(frame_bytes(false, OpCode::Text, b"abc"));
        bytes.extend(frame_bytes(true, OpCode::Ping, b"x"));
        bytes.extend(frame_bytes(true, OpCode::Continuation, b"def"));

        let mut parser = MessageParser::new(1 << 20, None);
        let mut messages = Vec::new();
        parser.consume(&bytes, |m| messages.push(m)).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind, MessageKind::Ping);
        assert_eq!(messages[0].payload, b"x");
        assert_eq!(messages[1].kind, MessageKind::Text);
        assert_eq!(messages[1].payload, b"abcdef");
    }

    #[test]
    fn invalid_utf8_text_message_is_rejected() {
        let bytes = frame_bytes(true, OpCode::Text, &[0xC0, 0xAF]);
        let mut parser = MessageParser::new(1 << 20, None);
        let err = parser.consume(&bytes, |_| {}).unwrap_err();
        assert_eq!(err.close_code(), Some(1007));
    }

    #[test]
    fn continuation_without_open_message_is_protocol_error() {
        let bytes = frame_bytes(true, OpCode::Continuation, b"oops");
        let mut parser = MessageParser::new(1 << 20, None);
        let err = parser.consume(&bytes, |_| {}).unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }
}
