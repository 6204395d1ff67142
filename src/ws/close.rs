//! WebSocket close-code validation (§6) and close-frame payload
//! encoding/decoding.
//!
//! Grounded on `original_source/core/src/core/websocket/Client3.cpp`'s
//! close-code validation arithmetic (`defaultMessageHandler`), cross-checked
//! against `examples/littledivy-fastwebsockets/src/lib.rs`'s
//! `CloseCode::is_allowed`.

/// A WebSocket close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
    pub const UNSUPPORTED: CloseCode = CloseCode(1003);
    pub const INVALID_UTF8: CloseCode = CloseCode(1007);
    pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
    pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);
    pub const EXTENSION_REQUIRED: CloseCode = CloseCode(1010);
    pub const SERVER_ERROR: CloseCode = CloseCode(1011);

    /// True for any code a peer is allowed to *send on the wire*. Mirrors
    /// the reserved-range rejection from spec.md §6: below 1000, the
    /// never-sent codes 1004/1005/1006, and the 1014..=2999 reserved band
    /// are all invalid when actually observed in a received close frame.
    pub fn is_allowed(self) -> bool {
        match self.0 {
            0..=999 => false,
            1004 | 1005 | 1006 => false,
            1014..=2999 => false,
            _ => true,
        }
    }
}

/// Decodes the payload of an inbound CLOSE frame into an optional code and
/// reason, applying the exact acceptance rules from spec.md §4.7's default
/// close handler:
///
/// - empty payload -> `(None, None)`, reply should be `1000`.
/// - exactly one byte -> malformed, reply should be `1002`.
/// - two or more bytes -> big-endian `u16` code, checked with
///   [`CloseCode::is_allowed`]; the remaining bytes must be valid UTF-8
///   (else reply `1007`).
pub fn decode_close_payload(payload: &[u8]) -> Result<(Option<CloseCode>, Option<String>), CloseCode> {
    if payload.is_empty() {
        return Ok((None, None));
    }
    if payload.len() == 1 {
        return Err(CloseCode::PROTOCOL_ERROR);
    }
    let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
    if !code.is_allowed() {
        return Err(CloseCode::PROTOCOL_ERROR);
    }
    let reason = std::str::from_utf8(&payload[2..]).map_err(|_| CloseCode::INVALID_UTF8)?;
    Ok((Some(code), Some(reason.to_string())))
}

/// Encodes a close frame payload from a code and optional reason.
pub fn encode_close_payload(code: CloseCode, reason: Option<&str>) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + reason.map_or(0, str::len));
    out.extend_from_slice(&code.0.to_be_bytes());
    if let Some(reason) = reason {
        out.extend_from_slice(reason.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_means_no_code() {
        assert_eq!(decode_close_payload(&[]).unwrap(), (None, None));
    }

    #[test]
    fn single_byte_is_malformed() {
        assert_eq!(decode_close_payload(&[0]).unwrap_err(), CloseCode::PROTOCOL_ERROR);
    }

    #[test]
    fn reserved_codes_are_rejected() {
        for code in [999u16, 1004, 1005, 1006, 1014, 2999] {
            let payload = code.to_be_bytes();
            assert_eq!(decode_close_payload(&payload).unwrap_err(), CloseCode::PROTOCOL_ERROR, "code {code}");
        }
    }

    #[test]
    fn valid_code_and_reason_roundtrips() {
        let payload = encode_close_payload(CloseCode::NORMAL, Some("bye"));
        let (code, reason) = decode_close_payload(&payload).unwrap();
        assert_eq!(code, Some(CloseCode::NORMAL));
        assert_eq!(reason.as_deref(), Some("bye"));
    }

    #[test]
    fn invalid_utf8_reason_is_rejected() {
        let mut payload = CloseCode::NORMAL.0.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xC0, 0xAF]);
        assert_eq!(decode_close_payload(&payload).unwrap_err(), CloseCode::INVALID_UTF8);
    }
}
