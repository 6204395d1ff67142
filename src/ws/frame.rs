//! RFC 6455 frame header, wire-format opcode, and the incremental frame
//! parser (C6, first half).
//!
//! The parser's state machine and field names are grounded on
//! `original_source/core/include/core/websocket/FrameParser.h`
//! (`STATE_PRE` / `STATE_HEADER` / `STATE_PAYLOAD` / `STATE_END`); the exact
//! bit layout (rsv bits, 126/127 extended length, 4-byte mask word) is
//! cross-checked against `examples/littledivy-fastwebsockets/src/lib.rs`'s
//! `poll_parse_frame_header`.

use crate::error::Error;

/// WebSocket opcode (RFC 6455 §5.2).
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
    pub(crate) fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub(crate) fn as_raw(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// Control opcodes have the high bit of the low nibble set (`op & 0x8`).
    pub fn is_control(self) -> bool {
        self.as_raw() & 0x8 != 0
    }
}

/// A parsed frame header, before its payload has fully arrived.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

/// A complete frame: header plus payload, already unmasked if it arrived
/// masked.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Encodes a single, unfragmented (`FIN=1`) frame for `opcode`/`payload`,
/// masking it with `mask` when present. Used by `Client::write_frame`;
/// control-frame truncation to 125 bytes is the caller's responsibility
/// (spec.md §4.7).
pub fn encode(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + payload.len());
    out.push(0x80 | opcode.as_raw());

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload.len() < 126 {
        out.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pre,
    Header,
    Payload,
}

/// Incremental byte-stream frame parser. `consume` can be called with
/// arbitrarily small slices of the stream; it accumulates state across
/// calls and yields one [`Frame`] per completed call, restarting itself
/// for the next frame.
pub struct FrameParser {
    phase: Phase,
    header_buf: Vec<u8>,
    header_target: usize,
    header: Option<FrameHeader>,
    payload: Vec<u8>,
    max_payload: u64,
    /// Which way this parser is reading: `Some(true)` requires every frame
    /// to be masked (a server reading from its client, per spec.md §4.6),
    /// `Some(false)` requires every frame to be unmasked (a client reading
    /// from its server), `None` accepts either (used where direction
    /// enforcement is exercised separately, e.g. the frame-layer unit
    /// tests).
    require_masked: Option<bool>,
}

impl FrameParser {
    pub fn new(max_payload: u64, require_masked: Option<bool>) -> Self {
        FrameParser {
            phase: Phase::Pre,
            header_buf: Vec::with_capacity(14),
            header_target: 2,
            header: None,
            payload: Vec::new(),
            max_payload,
            require_masked,
        }
    }

    /// Feeds `data` into the parser. Returns the number of bytes consumed
    /// and, if a frame completed, the frame itself. Unconsumed bytes (past
    /// a completed frame) are the caller's responsibility to resubmit.
    pub fn consume(&mut self, data: &[u8]) -> crate::error::Result<(usize, Option<Frame>)> {
        let mut consumed = 0;

        loop {
            match self.phase {
                Phase::Pre | Phase::Header => {
                    let need = self.header_target - self.header_buf.len();
                    let take = need.min(data.len() - consumed);
                    self.header_buf.extend_from_slice(&data[consumed..consumed + take]);
                    consumed += take;

                    if self.header_buf.len() < self.header_target {
                        return Ok((consumed, None));
                    }

                    if self.phase == Phase::Pre {
                        self.enter_header_phase()?;
                        // header_target may have grown; loop again to
                        // accumulate the rest before parsing.
                        continue;
                    }

                    self.finish_header()?;
                    if self.header.as_ref().unwrap().payload_len == 0 {
                        let frame = self.take_frame();
                        return Ok((consumed, Some(frame)));
                    }
                    self.phase = Phase::Payload;
                }
                Phase::Payload => {
                    let header = self.header.as_ref().expect("header set before payload phase");
                    let remaining = header.payload_len as usize - self.payload.len();
                    let take = remaining.min(data.len() - consumed);
                    self.payload.extend_from_slice(&data[consumed..consumed + take]);
                    consumed += take;

                    if self.payload.len() < header.payload_len as usize {
                        return Ok((consumed, None));
                    }

                    if let Some(mask) = header.mask {
                        for (i, byte) in self.payload.iter_mut().enumerate() {
                            *byte ^= mask[i % 4];
                        }
                    }
                    let frame = self.take_frame();
                    return Ok((consumed, Some(frame)));
                }
            }
        }
    }

    fn enter_header_phase(&mut self) -> crate::error::Result<()> {
        let b0 = self.header_buf[0];
        let b1 = self.header_buf[1];

        let rsv1 = b0 & 0x40 != 0;
        let rsv2 = b0 & 0x20 != 0;
        let rsv3 = b0 & 0x10 != 0;
        if rsv1 || rsv2 || rsv3 {
            return Err(Error::protocol(1002, "reserved bits must be zero"));
        }

        let opcode = OpCode::from_raw(b0 & 0x0F)
            .ok_or_else(|| Error::protocol(1002, "unknown opcode"))?;
        let fin = b0 & 0x80 != 0;
        let masked = b1 & 0x80 != 0;
        let len_field = b1 & 0x7F;

        if opcode.is_control() && (!fin || len_field > 125) {
            return Err(Error::protocol(1002, "control frame must be final and <=125 bytes"));
        }

        if let Some(expected) = self.require_masked {
            if masked != expected {
                return Err(Error::protocol(1002, "frame mask bit does not match the connection's direction"));
            }
        }

        let ext_len_size = match len_field {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask_size = if masked { 4 } else { 0 };
        self.header_target = 2 + ext_len_size + mask_size;
        self.phase = Phase::Header;

        // Stash the decoded fixed-header bits; payload_len/mask are filled
        // in once the extended fields arrive.
        self.header = Some(FrameHeader {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask: None,
            payload_len: len_field as u64,
        });
        Ok(())
    }

    fn finish_header(&mut self) -> crate::error::Result<()> {
        let mut offset = 2;
        let header = self.header.as_mut().expect("enter_header_phase sets this");

        let len_field = header.payload_len;
        if len_field == 126 {
            let bytes: [u8; 2] = self.header_buf[offset..offset + 2].try_into().unwrap();
            header.payload_len = u16::from_be_bytes(bytes) as u64;
            offset += 2;
        } else if len_field == 127 {
            let bytes: [u8; 8] = self.header_buf[offset..offset + 8].try_into().unwrap();
            header.payload_len = u64::from_be_bytes(bytes);
            offset += 8;
        }

        if self.header_buf.len() > offset {
            let bytes: [u8; 4] = self.header_buf[offset..offset + 4].try_into().unwrap();
            header.mask = Some(bytes);
        }

        if header.payload_len > self.max_payload {
            return Err(Error::protocol(1009, "message too big"));
        }
        self.payload = Vec::with_capacity(header.payload_len as usize);
        Ok(())
    }

    fn take_frame(&mut self) -> Frame {
        let header = self.header.take().expect("header set before a frame completes");
        let payload = std::mem::take(&mut self.payload);
        self.header_buf.clear();
        self.header_target = 2;
        self.phase = Phase::Pre;
        Frame { header, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_unmasked(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x80 | opcode.as_raw()];
        if payload.len() < 126 {
            out.push(payload.len() as u8);
        } else if payload.len() <= u16::MAX as usize {
            out.push(126);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_small_text_frame_fed_one_byte_at_a_time() {
        let encoded = encode_unmasked(OpCode::Text, b"hello");
        let mut parser = FrameParser::new(1 << 20, None);
        let mut frame = None;
        for &b in &encoded {
            let (_, f) = parser.consume(&[b]).unwrap();
            if f.is_some() {
                frame = f;
            }
        }
        let frame = frame.unwrap();
        assert_eq!(frame.header.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn large_payload_uses_64_bit_length() {
        let payload = vec![0u8; 100_000];
        let encoded = encode_unmasked(OpCode::Binary, &payload);
        assert_eq!(encoded[1], 127);
        let mut parser = FrameParser::new(1 << 20, None);
        let (consumed, frame) = parser.consume(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.unwrap().payload.len(), 100_000);
    }

    #[test]
    fn rejects_reserved_bits() {
        let mut parser = FrameParser::new(1 << 20, None);
        let err = parser.consume(&[0x40 | 0x1, 0x00]).unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn rejects_oversize_control_frame() {
        let mut parser = FrameParser::new(1 << 20, None);
        let err = parser.consume(&[0x89, 126]).unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn encode_then_parse_roundtrips_with_masking() {
        let mask = [0xDE, 0xAD, 0xBE, 0xEF];
        let encoded = encode(OpCode::Text, b"round trip", Some(mask));
        let mut parser = FrameParser::new(1 << 20, None);
        let (consumed, frame) = parser.consume(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        let frame = frame.unwrap();
        assert_eq!(frame.header.opcode, OpCode::Text);
        assert_eq!(frame.payload, b"round trip");
    }

    #[test]
    fn encode_picks_extended_length_form_by_size() {
        assert_eq!(encode(OpCode::Text, b"hi", None)[1], 2);
        assert_eq!(encode(OpCode::Binary, &vec![0u8; 200], None)[1], 126);
        assert_eq!(encode(OpCode::Binary, &vec![0u8; 70_000], None)[1], 127);
    }

    #[test]
    fn masked_payload_is_unmasked_on_arrival() {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let payload = b"abcd";
        let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect();
        let mut encoded = vec![0x80 | OpCode::Binary.as_raw(), 0x80 | 4];
        encoded.extend_from_slice(&mask);
        encoded.extend_from_slice(&masked);

        let mut parser = FrameParser::new(1 << 20, None);
        let (_, frame) = parser.consume(&encoded).unwrap();
        assert_eq!(frame.unwrap().payload, payload);
    }
}
