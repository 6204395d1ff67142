//! Pending operations and the set that tracks them.
//!
//! Grounded directly on `LinuxEventLoop2`'s `Op` hierarchy and `OpSet`: a
//! mutex-guarded map from id to operation, with an `open` flag so that once
//! a loop starts shutting down, no further operation can be pushed into it.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::shared::WeakRef;
use crate::thread::EventThread;
use crate::token::{IdCounter, OpId, SourceId};

/// A unit of work scheduled on an [`crate::event_loop::EventLoop`], waiting
/// on either a host completion (Windows) or the next readiness poll
/// (Linux).
pub(crate) enum Operation {
    /// Accept a connection on `source`, notifying `thread`.
    Accept {
        source: SourceId,
        thread: WeakRef<dyn EventThread>,
    },
    /// Read up to `max_len` bytes from `source`, notifying `thread`.
    Read {
        source: SourceId,
        thread: WeakRef<dyn EventThread>,
        max_len: usize,
    },
    /// Write `data[offset..]` to `source`, notifying `thread` once some
    /// bytes land; `offset` tracks partial writes across repeated
    /// non-blocking attempts.
    Write {
        source: SourceId,
        thread: WeakRef<dyn EventThread>,
        data: Vec<u8>,
        offset: usize,
    },
    /// Deliver a user event to `thread` on the next loop tick.
    SendEvent {
        thread: WeakRef<dyn EventThread>,
        event: Box<dyn std::any::Any + Send>,
    },
    /// Ask `thread` to stop; delivered out of band from normal I/O
    /// dispatch.
    StopThread { thread: WeakRef<dyn EventThread> },
    /// Unwind the whole loop: drop every other pending operation and
    /// return from `run()`.
    Close,
}

/// Mutex-guarded table of pending operations for one loop.
///
/// Matches the original's `OpSet` exactly: `try_push` fails once the set
/// has been closed, `pop` removes and returns by id, `clear` empties the
/// table in one stroke (used by `stop()`'s completion-path semantics, see
/// the Open Question resolution in `DESIGN.md`).
pub(crate) struct OpSet {
    ids: IdCounter,
    inner: Mutex<OpSetInner>,
}

struct OpSetInner {
    open: bool,
    ops: HashMap<u64, Operation>,
}

impl OpSet {
    pub(crate) fn new() -> Self {
        OpSet {
            ids: IdCounter::default(),
            inner: Mutex::new(OpSetInner {
                open: true,
                ops: HashMap::new(),
            }),
        }
    }

    /// Allocates an id and inserts `op`, failing if the set has been
    /// closed (the loop is shutting down).
    pub(crate) fn try_push(&self, op: Operation) -> Result<OpId> {
        let id = self.ids.next_op();
        let mut inner = self.inner.lock().expect("OpSet mutex poisoned");
        if !inner.open {
            return Err(Error::Gone("event loop"));
        }
        inner.ops.insert(id.as_raw(), op);
        Ok(id)
    }

    /// Removes and returns the operation with this id, if it is still
    /// pending.
    pub(crate) fn pop(&self, id: OpId) -> Option<Operation> {
        let mut inner = self.inner.lock().expect("OpSet mutex poisoned");
        inner.ops.remove(&id.as_raw())
    }

    /// Re-inserts a partially completed operation under the same id (used
    /// for short writes that need another writable-readiness event).
    pub(crate) fn reinsert(&self, id: OpId, op: Operation) {
        let mut inner = self.inner.lock().expect("OpSet mutex poisoned");
        if inner.open {
            inner.ops.insert(id.as_raw(), op);
        }
    }

    /// Marks the set closed (no further pushes succeed) and drains every
    /// pending operation, dropping them. This is the "completion path"
    /// cancellation rule from spec.md §9: every outstanding accept/read/
    /// write for the loop is abandoned in one stroke rather than
    /// individually cancelled.
    pub(crate) fn close(&self) -> Vec<Operation> {
        let mut inner = self.inner.lock().expect("OpSet mutex poisoned");
        inner.open = false;
        inner.ops.drain().map(|(_, op)| op).collect()
    }

    /// Removes and returns every pending `SendEvent`/`StopThread` operation,
    /// leaving `Accept`/`Read`/`Write` (which are also referenced by a
    /// source's `OpQueue` and must stay keyed by id until that queue
    /// services them) untouched.
    ///
    /// Ids are assigned by the loop's monotonic `IdCounter` in submission
    /// order, so sorting the collected ids ascending before draining
    /// restores that submission order: a `HashMap`'s iteration order is
    /// arbitrary and would otherwise silently reorder `SendEvent`s to the
    /// same thread within one `wait()` batch, violating the FIFO-per-
    /// `(sender, receiver)` guarantee from spec.md §5.
    pub(crate) fn take_admin_ops(&self) -> Vec<Operation> {
        let mut inner = self.inner.lock().expect("OpSet mutex poisoned");
        let mut admin_ids: Vec<u64> = inner
            .ops
            .iter()
            .filter(|(_, op)| matches!(op, Operation::SendEvent { .. } | Operation::StopThread { .. }))
            .map(|(&id, _)| id)
            .collect();
        admin_ids.sort_unstable();
        admin_ids
            .into_iter()
            .filter_map(|id| inner.ops.remove(&id))
            .collect()
    }

    /// Re-opens a previously closed set. Only used when a loop is reused
    /// after a coordinated shutdown in tests.
    #[cfg(test)]
    pub(crate) fn reopen(&self) {
        let mut inner = self.inner.lock().expect("OpSet mutex poisoned");
        inner.open = true;
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("OpSet mutex poisoned").ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let set = OpSet::new();
        let id = set.try_push(Operation::Close).unwrap();
        assert!(matches!(set.pop(id), Some(Operation::Close)));
        assert!(set.pop(id).is_none());
    }

    #[test]
    fn close_drains_and_blocks_future_pushes() {
        let set = OpSet::new();
        set.try_push(Operation::Close).unwrap();
        set.try_push(Operation::Close).unwrap();
        let drained = set.close();
        assert_eq!(drained.len(), 2);
        assert!(set.try_push(Operation::Close).is_err());
    }
}
