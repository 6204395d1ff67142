//! Opaque identifiers handed out by an [`crate::event_loop::EventLoop`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one pending [`crate::operation::Operation`] inside an
/// [`crate::event_loop::OpSet`].
///
/// `OpId` is deliberately a bare `u64` newtype rather than the trait-based
/// `Token` the oldest mio releases used: Rust's type system doesn't need an
/// indirection layer to let different integer widths serve as a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        OpId(raw)
    }

    pub(crate) fn as_raw(self) -> u64 {
        self.0
    }
}

/// Identifies one registered [`crate::source::SocketSource`] inside a
/// [`crate::event_loop::SourceSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        SourceId(raw)
    }

    pub(crate) fn as_raw(self) -> u64 {
        self.0
    }
}

/// Identifies one registered [`crate::thread::EventThread`] inside a
/// [`crate::event_loop::ThreadSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    pub(crate) const fn from_raw(raw: u64) -> Self {
        ThreadId(raw)
    }

    pub(crate) fn as_raw(self) -> u64 {
        self.0
    }
}

/// Monotonic counter shared by the three id kinds above. Each `EventLoop`
/// owns one; ids are never reused within its lifetime, which keeps a stale
/// id from a dropped operation from ever aliasing a live one.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(AtomicU64);

impl IdCounter {
    pub(crate) fn next_op(&self) -> OpId {
        OpId::from_raw(self.0.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_source(&self) -> SourceId {
        SourceId::from_raw(self.0.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_thread(&self) -> ThreadId {
        ThreadId::from_raw(self.0.fetch_add(1, Ordering::Relaxed))
    }
}
