//! Platform-independent facade over the OS polling primitive (C1).
//!
//! Exactly one [`Poller`] exists per [`crate::event_loop::EventLoop`]. It
//! exposes three operations, named after the spec's Poller contract:
//! `register` (add a raw socket, interested in read/write readiness),
//! `post` (wake the loop out of a blocking wait, used by `stop`/
//! `send_event`/`stop_thread`), and `wait` (block until the next batch of
//! readiness/completion events, or until `post` fires).

use std::time::Duration;

use crate::error::Result;
use crate::net::RawSocket;
use crate::token::SourceId;

#[cfg(unix)]
#[path = "sys/unix/mod.rs"]
mod sys;
#[cfg(windows)]
#[path = "sys/windows/mod.rs"]
mod sys;

/// Which directions a registration is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interest {
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl Interest {
    pub(crate) const BOTH: Interest = Interest { readable: true, writable: true };
    /// The steady-state interest for every registered source: a socket is
    /// armed for write-readiness only while it has a pending `Write` (see
    /// `EventLoop::enqueue_write`/`dispatch_source_readiness`), since a
    /// connected TCP socket is almost always writable and would otherwise
    /// make every `wait()` tick return immediately.
    pub(crate) const READ_ONLY: Interest = Interest { readable: true, writable: false };
}

/// One readiness/completion notification returned from [`Poller::wait`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollEvent {
    pub(crate) source: SourceId,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

/// Facade over `epoll` (Unix) or `WSAPoll` (Windows).
pub(crate) struct Poller {
    selector: sys::Selector,
}

impl Poller {
    pub(crate) fn new() -> Result<Self> {
        Ok(Poller { selector: sys::Selector::new()? })
    }

    pub(crate) fn register(
        &self,
        socket: RawSocket,
        source: SourceId,
        interest: Interest,
    ) -> Result<()> {
        self.selector.register(socket, source, interest)
    }

    pub(crate) fn deregister(&self, socket: RawSocket) -> Result<()> {
        self.selector.deregister(socket)
    }

    /// Re-arms an already-registered source for a (possibly) different set
    /// of directions -- used to add/drop write-readiness interest as a
    /// source's `poll_out` queue fills and drains.
    pub(crate) fn modify(&self, socket: RawSocket, source: SourceId, interest: Interest) -> Result<()> {
        self.selector.modify(socket, source, interest)
    }

    /// Wakes a concurrent or subsequent call to `wait` with no readiness
    /// events, just the wakeup itself. Used so `stop`/`send_event`/
    /// `stop_thread` can be called from any thread while the loop thread
    /// is blocked in `wait`.
    pub(crate) fn post(&self) -> Result<()> {
        self.selector.post()
    }

    pub(crate) fn wait(&self, events: &mut Vec<PollEvent>, timeout: Option<Duration>) -> Result<()> {
        self.selector.wait(events, timeout)
    }
}
