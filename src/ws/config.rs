//! `ServerConfig`/`ClientConfig`, per spec.md §6.

use crate::shared::WeakRef;
use crate::thread::EventThread;

/// Default cap on the bytes buffered while waiting for the handshake's
/// terminating blank line, before giving up with a handshake error.
pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 1024;
/// Default cap on a single reassembled WebSocket message.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration for [`crate::ws::server::Server::start`].
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_handshake_size: usize,
    pub max_message_size: u64,
    /// Notified with `WebSocketNewConnection` once a client's handshake
    /// completes.
    pub handler: WeakRef<dyn EventThread>,
}

impl ServerConfig {
    pub fn new(handler: WeakRef<dyn EventThread>) -> Self {
        ServerConfig {
            host: "localhost".to_string(),
            port: 0,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            handler,
        }
    }
}

/// Configuration for [`crate::ws::client::Client::connect`].
pub struct ClientConfig {
    pub url: String,
    pub max_handshake_size: usize,
    pub max_message_size: u64,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ClientConfig {
            url: url.into(),
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
