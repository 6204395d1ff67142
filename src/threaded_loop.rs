//! Fan-out over N [`EventLoop`]s (C5), one per worker thread.
//!
//! Grounded on `original_source/core/include/core/ThreadedEventLoop2.h`:
//! an array of loops, a round-robin `next()` for placement, `run()`
//! spawning a thread per loop but 1..N (the caller's own thread drives
//! loop 0), and `stop()` stopping every loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, EventLoopConfig};
use crate::shared::Shared;

/// A collection of [`EventLoop`]s load-balanced round-robin. Accept
/// threads typically register their listening socket on loop 0 and then
/// hand each newly accepted connection to `next()`.
pub struct ThreadedEventLoop {
    loops: Vec<Shared<EventLoop>>,
    next_index: AtomicUsize,
}

impl ThreadedEventLoop {
    /// Creates `thread_count` loops (defaulting to the available
    /// parallelism when `None`, mirroring
    /// `std::thread::hardware_concurrency()` in the original).
    pub fn create(thread_count: Option<usize>) -> Result<Shared<Self>> {
        Self::with_config(thread_count, EventLoopConfig::default())
    }

    pub fn with_config(thread_count: Option<usize>, config: EventLoopConfig) -> Result<Shared<Self>> {
        let count = thread_count
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1);

        let mut loops = Vec::with_capacity(count);
        for _ in 0..count {
            loops.push(EventLoop::with_config(config)?);
        }

        Ok(Shared::new(ThreadedEventLoop {
            loops,
            next_index: AtomicUsize::new(0),
        }))
    }

    /// The next loop to place work on, chosen round-robin.
    pub fn next(&self) -> Shared<EventLoop> {
        let i = self.next_index.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        Shared::clone(&self.loops[i])
    }

    /// Loop used for accept sockets and other "first" registrations.
    pub fn primary(&self) -> Shared<EventLoop> {
        Shared::clone(&self.loops[0])
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// Spawns a thread for every loop but the first, then runs the first
    /// loop on the calling thread; blocks until every loop has stopped.
    /// Aggregates the first error encountered, if any, matching the
    /// original's "collect all, report one" behaviour.
    pub fn run(&self) -> Result<()> {
        let handles: Vec<JoinHandle<Result<()>>> = self.loops[1..]
            .iter()
            .map(|loop_| {
                let loop_ = Shared::clone(loop_);
                std::thread::spawn(move || loop_.run())
            })
            .collect();

        let primary_result = self.loops[0].run();

        let mut first_err: Option<Error> = primary_result.err();
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => first_err.get_or_insert(err),
                Err(_) => first_err.get_or_insert(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "worker loop panicked",
                ))),
            };
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stops every loop in the collection.
    pub fn stop(&self) {
        for loop_ in &self.loops {
            loop_.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_round_robins_across_loops() {
        let tel = ThreadedEventLoop::create(Some(3)).unwrap();
        let picks: Vec<usize> = (0..6)
            .map(|_| Shared::as_ptr(&tel.next()) as usize)
            .collect();
        assert_eq!(picks[0], picks[3]);
        assert_eq!(picks[1], picks[4]);
        assert_eq!(picks[2], picks[5]);
        assert_ne!(picks[0], picks[1]);
    }
}
