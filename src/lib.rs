//! A cross-platform event-driven I/O core with a built-in RFC 6455
//! WebSocket client and server.
//!
//! The crate is organised bottom-up, leaf-first:
//!
//! - [`poll`] wraps the host's readiness multiplexer (`epoll` on Linux,
//!   `WSAPoll` on Windows) behind one identical contract.
//! - [`event_loop`] is the single-threaded reactor that owns one [`Poller`]
//!   and dispatches completed [`operation::Operation`]s to the
//!   [`EventThread`]s registered with it.
//! - [`thread`] defines the cooperative actor abstraction ([`EventThread`])
//!   and the socket handle ([`EventSocket`]) threads use to start
//!   accept/read/write operations.
//! - [`threaded_loop`] fans a single loop out across N worker threads for
//!   parallelism.
//! - [`ws`] layers a full WebSocket client and server on top of the above.
//!
//! Enable the `interlock` feature for [`interlock::SingleInstanceGuard`], a
//! process-wide single-instance lock used by applications that embed this
//! core behind a server (e.g. the ledger CLI described in the design notes).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waveloop::event_loop::EventLoop;
//! use waveloop::thread::{Event, EventThread};
//! use waveloop::error::Result;
//!
//! struct Echo;
//!
//! impl EventThread for Echo {
//!     fn handle(&self, _event: Event) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let event_loop = EventLoop::create().unwrap();
//! event_loop.start_thread(Arc::new(Echo)).unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rust_2018_idioms)]

pub mod error;

#[cfg(feature = "os-poll")]
mod poll;
#[cfg(feature = "os-poll")]
mod operation;
#[cfg(feature = "os-poll")]
mod source;
#[cfg(feature = "os-poll")]
pub mod shared;
#[cfg(feature = "os-poll")]
pub mod token;
#[cfg(feature = "os-poll")]
pub mod thread;
#[cfg(feature = "os-poll")]
pub mod event_loop;
#[cfg(feature = "os-poll")]
pub mod threaded_loop;

#[cfg(feature = "net")]
pub mod net;

#[cfg(feature = "ws")]
pub mod ws;

#[cfg(feature = "interlock")]
pub mod interlock;

#[cfg(feature = "os-poll")]
pub use crate::event_loop::{EventLoop, EventLoopConfig};
#[cfg(feature = "os-poll")]
pub use crate::thread::{Event, EventSocket, EventThread};
#[cfg(feature = "os-poll")]
pub use crate::threaded_loop::ThreadedEventLoop;

/// Build-time feature documentation, mirroring the `[features]` table in
/// `Cargo.toml`.
///
/// - `os-poll` (default): the `EventLoop`/`Poller` registration machinery.
/// - `net` (default): `waveloop::net`, TCP primitives registrable with a
///   loop.
/// - `ws` (default): the `waveloop::ws` WebSocket client/server engine.
/// - `interlock`: the single-instance process lock under
///   `waveloop::interlock`.
pub mod features {}
