//! Registered I/O sources (C1/C2 plumbing) -- currently just sockets.
//!
//! Grounded on `LinuxEventLoop2::SocketSource`: a source owns one raw
//! socket plus two FIFO queues of pending operation ids, one per
//! direction. When the poller reports readiness (or, on Windows, a
//! completion) for a direction, the loop calls `handle_poll_in`/
//! `handle_poll_out`, which drains the queue front-to-back, retrying the
//! underlying syscall non-blockingly until it would block or the queue
//! empties.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::net::{RawSocket, TcpStream};
use crate::operation::{OpSet, Operation};
use crate::shared::WeakRef;
use crate::thread::{Event, EventThread};
use crate::token::OpId;

/// What kind of socket a [`SocketSource`] wraps. A listener only ever
/// services `Accept` operations; a stream only ever services `Read`/
/// `Write`.
pub(crate) enum RawSource {
    Listener(crate::net::TcpListener),
    Stream(TcpStream),
}

impl RawSource {
    pub(crate) fn raw(&self) -> RawSocket {
        match self {
            RawSource::Listener(l) => l.raw_socket(),
            RawSource::Stream(s) => s.raw_socket(),
        }
    }
}

/// FIFO queue of operation ids waiting on one direction (in or out) of a
/// source.
#[derive(Default)]
struct OpQueue(Mutex<VecDeque<OpId>>);

impl OpQueue {
    fn push(&self, id: OpId) {
        self.0.lock().expect("OpQueue mutex poisoned").push_back(id);
    }

    fn peek_front(&self) -> Option<OpId> {
        self.0.lock().expect("OpQueue mutex poisoned").front().copied()
    }

    fn pop_front(&self) {
        self.0.lock().expect("OpQueue mutex poisoned").pop_front();
    }

    fn is_empty(&self) -> bool {
        self.0.lock().expect("OpQueue mutex poisoned").is_empty()
    }
}

/// A socket registered with an event loop, plus the operations waiting on
/// it in each direction.
pub struct SocketSource {
    pub(crate) raw: Mutex<RawSource>,
    poll_in: OpQueue,
    poll_out: OpQueue,
}

impl SocketSource {
    pub(crate) fn new(raw: RawSource) -> Self {
        SocketSource {
            raw: Mutex::new(raw),
            poll_in: OpQueue::default(),
            poll_out: OpQueue::default(),
        }
    }

    pub(crate) fn raw_socket(&self) -> RawSocket {
        self.raw.lock().expect("source mutex poisoned").raw()
    }

    pub(crate) fn enqueue_in(&self, id: OpId) {
        self.poll_in.push(id);
    }

    /// Returns `true` if the write queue was empty before `id` was pushed
    /// -- the caller uses this to decide whether write-readiness interest
    /// needs to be armed with the poller.
    pub(crate) fn enqueue_out(&self, id: OpId) -> bool {
        let was_idle = self.poll_out.is_empty();
        self.poll_out.push(id);
        was_idle
    }

    /// Drains the read-direction queue while the source stays readable.
    /// Returns once an operation would block or the queue is empty.
    pub(crate) fn handle_poll_in(&self, ops: &OpSet) -> Result<()> {
        loop {
            let Some(front) = self.poll_in.peek_front() else {
                return Ok(());
            };
            let Some(op) = ops.pop(front) else {
                self.poll_in.pop_front();
                continue;
            };
            match self.try_complete_in(op, ops, front) {
                TryOutcome::WouldBlock => return Ok(()),
                TryOutcome::Done => {
                    self.poll_in.pop_front();
                }
            }
        }
    }

    /// Drains the write-direction queue while the source stays writable.
    pub(crate) fn handle_poll_out(&self, ops: &OpSet) -> Result<()> {
        loop {
            let Some(front) = self.poll_out.peek_front() else {
                return Ok(());
            };
            let Some(op) = ops.pop(front) else {
                self.poll_out.pop_front();
                continue;
            };
            match self.try_complete_out(op, ops, front) {
                TryOutcome::WouldBlock => return Ok(()),
                TryOutcome::Done => {
                    self.poll_out.pop_front();
                }
            }
        }
    }

    fn try_complete_in(&self, op: Operation, ops: &OpSet, id: OpId) -> TryOutcome {
        match op {
            Operation::Accept { thread, source } => {
                let mut raw = self.raw.lock().expect("source mutex poisoned");
                let RawSource::Listener(listener) = &mut *raw else {
                    drop(raw);
                    dispatch(&thread, Event::Read { data: Vec::new() });
                    return TryOutcome::Done;
                };
                match listener.accept_nonblocking() {
                    Ok(stream) => {
                        drop(raw);
                        dispatch(&thread, Event::Accept { socket: stream });
                        TryOutcome::Done
                    }
                    Err(ref e) if would_block(e) => {
                        drop(raw);
                        ops.reinsert(id, Operation::Accept { source, thread });
                        TryOutcome::WouldBlock
                    }
                    Err(_) => {
                        drop(raw);
                        TryOutcome::Done
                    }
                }
            }
            Operation::Read {
                thread,
                max_len,
                source,
            } => {
                let mut raw = self.raw.lock().expect("source mutex poisoned");
                let RawSource::Stream(stream) = &mut *raw else {
                    drop(raw);
                    return TryOutcome::Done;
                };
                let mut buf = vec![0u8; max_len];
                match stream.read(&mut buf) {
                    Ok(n) => {
                        drop(raw);
                        buf.truncate(n);
                        dispatch(&thread, Event::Read { data: buf });
                        TryOutcome::Done
                    }
                    Err(ref e) if would_block(e) => {
                        drop(raw);
                        ops.reinsert(id, Operation::Read { source, thread, max_len });
                        TryOutcome::WouldBlock
                    }
                    Err(_) => {
                        drop(raw);
                        dispatch(&thread, Event::Read { data: Vec::new() });
                        TryOutcome::Done
                    }
                }
            }
            other => {
                ops.reinsert(id, other);
                TryOutcome::WouldBlock
            }
        }
    }

    fn try_complete_out(&self, op: Operation, ops: &OpSet, id: OpId) -> TryOutcome {
        match op {
            Operation::Write {
                thread,
                mut data,
                mut offset,
                source,
            } => {
                let mut raw = self.raw.lock().expect("source mutex poisoned");
                let RawSource::Stream(stream) = &mut *raw else {
                    drop(raw);
                    return TryOutcome::Done;
                };
                match stream.write(&data[offset..]) {
                    Ok(n) => {
                        offset += n;
                        drop(raw);
                        if offset == data.len() {
                            dispatch(&thread, Event::Write { wrote: offset });
                            TryOutcome::Done
                        } else {
                            ops.reinsert(
                                id,
                                Operation::Write {
                                    source,
                                    thread,
                                    data: std::mem::take(&mut data),
                                    offset,
                                },
                            );
                            TryOutcome::WouldBlock
                        }
                    }
                    Err(ref e) if would_block(e) => {
                        drop(raw);
                        ops.reinsert(id, Operation::Write { source, thread, data, offset });
                        TryOutcome::WouldBlock
                    }
                    Err(_) => {
                        drop(raw);
                        TryOutcome::Done
                    }
                }
            }
            other => {
                ops.reinsert(id, other);
                TryOutcome::WouldBlock
            }
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.poll_in.is_empty() && self.poll_out.is_empty()
    }

    /// Whether the write-direction queue has drained -- used after
    /// `handle_poll_out` to decide whether write-readiness interest should
    /// be dropped again.
    pub(crate) fn poll_out_is_empty(&self) -> bool {
        self.poll_out.is_empty()
    }
}

enum TryOutcome {
    WouldBlock,
    Done,
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

fn dispatch(thread: &WeakRef<dyn EventThread>, event: Event) {
    if let Some(thread) = thread.upgrade() {
        if let Err(err) = thread.handle(event) {
            log::warn!("event thread handler returned an error: {err}");
        }
    }
}

/// A source that can be registered with an [`crate::event_loop::EventLoop`].
/// Currently only [`SocketSource`] implements it; the trait exists so the
/// loop's internal tables don't need to special-case socket kinds.
pub(crate) trait EventSource: Send + Sync {
    fn raw_socket(&self) -> RawSocket;
}

impl EventSource for SocketSource {
    fn raw_socket(&self) -> RawSocket {
        self.raw_socket()
    }
}

/// Converts an accept/read/write I/O error that isn't a would-block into a
/// crate [`Error`], for callers that need to surface it rather than
/// silently drop it (used by the Windows completion-based path).
pub(crate) fn io_error(e: io::Error) -> Error {
    Error::Io(e)
}
