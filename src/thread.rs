//! The cooperative actor abstraction (C3) and the socket handle (C4) that
//! `EventThread` implementations drive.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::shared::{Shared, WeakRef};
use crate::source::SocketSource;
use crate::token::SourceId;

/// A message dispatched to an [`EventThread`].
///
/// Mirrors `Event2`/`StartEvent2`/`AcceptEvent2`/... from the original: a
/// small closed set of loop-generated events, plus an escape hatch
/// (`User`) for application-defined messages sent via
/// [`EventLoop::send_event`].
pub enum Event {
    /// Sent once, right after [`EventLoop::start_thread`] registers the
    /// thread, so it can kick off its first operation (usually an accept
    /// or a read).
    Start,
    /// An [`crate::operation::Operation::Accept`] completed successfully.
    Accept { socket: crate::net::TcpStream },
    /// An [`crate::operation::Operation::Read`] completed. An empty `data`
    /// means the peer closed its write half (a clean EOF, not an error).
    Read { data: Vec<u8> },
    /// An [`crate::operation::Operation::Write`] completed; `wrote` is the
    /// number of bytes actually written in this completion.
    Write { wrote: usize },
    /// A user-defined payload sent via `send_event`/`send`.
    User(Box<dyn std::any::Any + Send>),
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Start => f.write_str("Event::Start"),
            Event::Accept { .. } => f.write_str("Event::Accept"),
            Event::Read { data } => write!(f, "Event::Read({} bytes)", data.len()),
            Event::Write { wrote } => write!(f, "Event::Write({wrote} bytes)"),
            Event::User(_) => f.write_str("Event::User(..)"),
        }
    }
}

/// An actor bound to one [`EventLoop`]. Implementations react to dispatched
/// [`Event`]s by driving an [`EventSocket`] (accept/read/write) or by
/// sending events to other threads.
///
/// Implementations are stored behind `Shared<dyn EventThread>` so the loop
/// can retain them across completions without the thread needing to manage
/// its own lifetime.
pub trait EventThread: Send + Sync {
    /// React to a dispatched event. Errors are logged by the loop and do
    /// not otherwise propagate -- a misbehaving thread does not bring the
    /// whole loop down.
    fn handle(&self, event: Event) -> Result<()>;

    /// Called by the loop once this thread has been asked to stop (either
    /// directly via [`EventLoop::stop_thread`] or as a side effect of the
    /// loop itself stopping). The default implementation does nothing.
    fn on_stop(&self) {}
}

/// A registered socket inside one loop. Cheap to clone; every clone shares
/// the same underlying [`SocketSource`].
#[derive(Clone)]
pub struct EventSocket {
    pub(crate) loop_ref: WeakRef<EventLoop>,
    pub(crate) source_id: SourceId,
    pub(crate) source: Shared<SocketSource>,
    closed: Shared<AtomicBool>,
}

impl EventSocket {
    pub(crate) fn new(
        loop_ref: WeakRef<EventLoop>,
        source_id: SourceId,
        source: Shared<SocketSource>,
    ) -> Self {
        EventSocket {
            loop_ref,
            source_id,
            source,
            closed: Shared::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues an accept operation; `thread` is notified with
    /// [`Event::Accept`] once a connection lands. Only valid on a listening
    /// socket.
    pub fn accept(&self, thread: WeakRef<dyn EventThread>) -> Result<()> {
        self.with_loop(|loop_| loop_.enqueue_accept(self, thread))
    }

    /// Enqueues a read operation; `thread` is notified with [`Event::Read`]
    /// once data (or EOF) is available.
    pub fn read(&self, thread: WeakRef<dyn EventThread>, max_len: usize) -> Result<()> {
        self.with_loop(|loop_| loop_.enqueue_read(self, thread, max_len))
    }

    /// Enqueues a write operation for `data`; `thread` is notified with
    /// [`Event::Write`] once some or all of it has been written.
    pub fn write(&self, thread: WeakRef<dyn EventThread>, data: Vec<u8>) -> Result<()> {
        self.with_loop(|loop_| loop_.enqueue_write(self, thread, data))
    }

    /// Deregisters this socket from its loop. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.with_loop(|loop_| loop_.close_source(self.source_id))
    }

    fn with_loop<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&EventLoop) -> Result<()>,
    {
        match self.loop_ref.upgrade() {
            Some(loop_) => f(&loop_),
            None => Err(crate::error::Error::Gone("event loop")),
        }
    }
}
