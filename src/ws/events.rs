//! The WebSocket-specific events dispatched to a user-supplied handler
//! thread, carried through the generic [`crate::thread::Event::User`]
//! escape hatch so the core loop's own `Event` enum stays closed.

use crate::shared::Shared;
use crate::ws::client::Client;
use crate::ws::message::Message;

/// Delivered to the handler thread a [`crate::ws::config::ServerConfig`]
/// or [`crate::ws::client::Client::connect`] call was given.
pub enum WsEvent {
    /// A complete text/binary/ping/pong/close message was reassembled.
    Message { client: Shared<Client>, message: Message },
    /// The connection hit a protocol violation; `code` is the close code
    /// sent to the peer.
    Error { client: Shared<Client>, code: u16, human: String },
    /// A server accepted a connection and its handshake completed.
    /// Only ever sent on the server side (see `DESIGN.md`'s Open Question
    /// resolution for why the client side does not also emit this).
    NewConnection { client: Shared<Client> },
    /// The connection has fully terminated, either because the peer
    /// closed it or because of a local error.
    Disconnected { client: Shared<Client> },
}

impl std::fmt::Debug for WsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsEvent::Message { message, .. } => write!(f, "Message({:?})", message.kind),
            WsEvent::Error { code, .. } => write!(f, "Error({code})"),
            WsEvent::NewConnection { .. } => write!(f, "NewConnection"),
            WsEvent::Disconnected { .. } => write!(f, "Disconnected"),
        }
    }
}
