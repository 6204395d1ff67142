//! The HTTP/1.1 Upgrade handshake: bit-exact request/response/error
//! strings, the SHA-1/base64 accept-key computation, and a minimal `ws://`
//! URL parser.
//!
//! Accept-key computation is grounded on `examples/other_examples/
//! 151b3968_Rapptz-axum__axum-src-extract-ws.rs.rs`'s
//! `sha1.update(key); sha1.update(GUID); base64::encode(digest)` sequence.
//! Wire strings are bit-exact per spec.md §6.

use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `base64(sha1(key || GUID))`, the `Sec-WebSocket-Accept` value.
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Generates a fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Components of a `ws://host[:port]/path[?query][#fragment]` URL. `wss`
/// is rejected at parse time -- TLS termination is a non-goal.
#[derive(Debug, Clone)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl WsUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("ws://")
            .ok_or_else(|| Error::Handshake("only the ws:// scheme is supported".into()))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let path = match path.find(['?', '#']) {
            Some(i) => &path[..i],
            None => path,
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| Error::Handshake("invalid port in url".into()))?;
                (host.to_string(), port)
            }
            None => (authority.to_string(), 80),
        };

        if host.is_empty() {
            return Err(Error::Handshake("empty host in url".into()));
        }

        Ok(WsUrl { host, port, path: path.to_string() })
    }
}

/// Builds the exact client opening-handshake request, per spec.md §6.
pub fn build_client_request(host: &str, port: u16, path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         content-length: 0\r\n\
         upgrade: websocket\r\n\
         sec-websocket-version: 13\r\n\
         connection: upgrade\r\n\
         sec-websocket-key: {key}\r\n\
         Host: {host}:{port}\r\n\
         \r\n"
    )
}

/// Builds the exact server `101 Switching Protocols` response.
pub fn build_server_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

/// Builds the minimal `400 Invalid` response sent on a failed handshake.
pub fn build_error_response(reason: &str) -> String {
    format!(
        "HTTP/1.1 400 Invalid\r\n\
         error: {reason}\r\n\
         content-length: 0\r\n\
         \r\n"
    )
}

/// A parsed HTTP/1.1 request line plus headers, lowercased-name for
/// case-insensitive lookup.
pub struct ParsedRequest {
    pub path: String,
    headers: Vec<(String, String)>,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parses `buf` as an HTTP/1.1 request, requiring the terminating
/// `\r\n\r\n` to already be present. Returns the parsed request and the
/// byte offset just past the terminator (bytes beyond that, if any,
/// belong to the first WebSocket frame and must be retained).
pub fn parse_request(buf: &[u8]) -> Result<(ParsedRequest, usize)> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::Handshake("request is not valid UTF-8".into()))?;
    let header_end = text
        .find("\r\n\r\n")
        .ok_or_else(|| Error::Handshake("no terminating blank line".into()))?;
    let head = &text[..header_end];
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or_default().to_string();
    if method != "GET" {
        return Err(Error::Handshake("only GET is supported".into()));
    }

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok((ParsedRequest { path, headers }, header_end + 4))
}

/// Validates that a server request asked to upgrade to a WebSocket and
/// returns the client's `Sec-WebSocket-Key`.
pub fn require_handshake_key(request: &ParsedRequest) -> Result<String> {
    let upgrade_ok = request
        .header("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(Error::Handshake("missing or invalid Upgrade header".into()));
    }
    request
        .header("sec-websocket-key")
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Handshake("missing Sec-WebSocket-Key".into()))
}

/// A parsed HTTP/1.1 response status line plus headers.
pub struct ParsedResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parses a server's handshake response, requiring the terminating
/// `\r\n\r\n` to already be present.
pub fn parse_response(buf: &[u8]) -> Result<(ParsedResponse, usize)> {
    let text = std::str::from_utf8(buf).map_err(|_| Error::Handshake("response is not valid UTF-8".into()))?;
    let header_end = text
        .find("\r\n\r\n")
        .ok_or_else(|| Error::Handshake("no terminating blank line".into()))?;
    let head = &text[..header_end];
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Handshake("malformed status line".into()))?;

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok((ParsedResponse { status, headers }, header_end + 4))
}

/// Validates a client-side handshake response against the key this client
/// sent, per RFC 6455 §4.2.2.
pub fn validate_server_response(response: &ParsedResponse, sent_key: &str) -> Result<()> {
    if response.status != 101 {
        return Err(Error::Handshake(format!("unexpected status {}", response.status)));
    }
    let accept = response
        .header("sec-websocket-accept")
        .ok_or_else(|| Error::Handshake("missing Sec-WebSocket-Accept".into()))?;
    if accept != compute_accept(sent_key) {
        return Err(Error::Handshake("Sec-WebSocket-Accept mismatch".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_the_rfc_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(compute_accept("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn parses_ws_url_without_explicit_port() {
        let url = WsUrl::parse("ws://example.com/chat").unwrap();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/chat");
    }

    #[test]
    fn parses_ws_url_with_port_and_query() {
        let url = WsUrl::parse("ws://127.0.0.1:9001/ws?x=1").unwrap();
        assert_eq!(url.host, "127.0.0.1");
        assert_eq!(url.port, 9001);
        assert_eq!(url.path, "/ws");
    }

    #[test]
    fn rejects_wss_scheme() {
        assert!(WsUrl::parse("wss://example.com/").is_err());
    }

    #[test]
    fn parses_client_request_and_extracts_key() {
        let key = generate_key();
        let request = build_client_request("localhost", 9001, "/", &key);
        let (parsed, end) = parse_request(request.as_bytes()).unwrap();
        assert_eq!(end, request.len());
        assert_eq!(require_handshake_key(&parsed).unwrap(), key);
    }

    #[test]
    fn validates_server_response_against_sent_key() {
        let key = generate_key();
        let accept = compute_accept(&key);
        let response = build_server_response(&accept);
        let (parsed, _) = parse_response(response.as_bytes()).unwrap();
        validate_server_response(&parsed, &key).unwrap();
    }
}
