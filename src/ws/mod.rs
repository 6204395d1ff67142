//! RFC 6455 WebSocket client and server (C6-C8), built entirely on top of
//! [`crate::event_loop`]'s `EventLoop`/`EventThread`/`EventSocket`
//! abstraction -- no I/O in this module bypasses the loop.
//!
//! - [`frame`] is the incremental frame parser and wire encoder (C6).
//! - [`message`] reassembles frames into complete messages, enforcing
//!   fragmentation and size rules (C6).
//! - [`close`] is the close-code validation table shared by both ends.
//! - [`handshake`] builds and parses the HTTP/1.1 Upgrade exchange.
//! - [`client`] is the per-connection actor sequence: handshake -> message
//!   reader -> termination (C7).
//! - [`server`] accepts connections and hands each one to `client` (C8).
//! - [`events`] are the `WsEvent`s delivered to the user-supplied handler
//!   thread.
//! - [`config`] holds `ServerConfig`/`ClientConfig`.

pub mod close;
pub mod config;
pub mod events;
pub mod frame;
pub mod handshake;
pub mod message;

pub mod client;
pub mod server;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use events::WsEvent;
pub use message::{Message, MessageKind};
pub use server::Server;
