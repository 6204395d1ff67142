//! The single-threaded reactor (C2) that owns one [`Poller`] and drives
//! every socket and thread registered with it.
//!
//! Grounded on `original_source/core/src/core/linux/EventLoop2.cpp`'s
//! `LinuxEventLoop2::run/stop/registerSocket/addThread/sendEventToThread/
//! stopThread`, restructured to match the teacher's single-reactor-thread
//! shape (`examples/tokio-rs-mio/src/event_loop.rs`'s `EventLoop::run`
//! dispatch loop).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::net::{RawSocket, TcpListener, TcpStream};
use crate::operation::{OpSet, Operation};
use crate::poll::{Interest, PollEvent, Poller};
use crate::shared::{Shared, SharedFromThis, WeakRef};
use crate::source::{RawSource, SocketSource};
use crate::thread::{Event, EventSocket, EventThread};
use crate::token::{IdCounter, SourceId, ThreadId};

/// Table of threads registered with a loop. Mirrors the original's
/// `ThreadSet`: a mutex-guarded map, `push`/`pop`/`clear`.
pub(crate) struct ThreadSet {
    ids: IdCounter,
    inner: Mutex<HashMap<u64, Shared<dyn EventThread>>>,
}

impl ThreadSet {
    fn new() -> Self {
        ThreadSet { ids: IdCounter::default(), inner: Mutex::new(HashMap::new()) }
    }

    fn push(&self, thread: Shared<dyn EventThread>) -> ThreadId {
        let id = self.ids.next_thread();
        self.inner.lock().expect("ThreadSet mutex poisoned").insert(id.as_raw(), thread);
        id
    }

    fn remove(&self, id: ThreadId) -> Option<Shared<dyn EventThread>> {
        self.inner.lock().expect("ThreadSet mutex poisoned").remove(&id.as_raw())
    }

    fn clear(&self) -> Vec<Shared<dyn EventThread>> {
        self.inner.lock().expect("ThreadSet mutex poisoned").drain().map(|(_, t)| t).collect()
    }
}

/// Table of sockets registered with a loop. Mirrors the original's
/// `SourceSet`.
pub(crate) struct SourceSet {
    ids: IdCounter,
    inner: Mutex<HashMap<u64, Shared<SocketSource>>>,
}

impl SourceSet {
    fn new() -> Self {
        SourceSet { ids: IdCounter::default(), inner: Mutex::new(HashMap::new()) }
    }

    fn push(&self, source: Shared<SocketSource>) -> SourceId {
        let id = self.ids.next_source();
        self.inner.lock().expect("SourceSet mutex poisoned").insert(id.as_raw(), source);
        id
    }

    fn get(&self, id: SourceId) -> Option<Shared<SocketSource>> {
        self.inner.lock().expect("SourceSet mutex poisoned").get(&id.as_raw()).cloned()
    }

    fn remove(&self, id: SourceId) -> Option<Shared<SocketSource>> {
        self.inner.lock().expect("SourceSet mutex poisoned").remove(&id.as_raw())
    }

    fn clear(&self) -> Vec<Shared<SocketSource>> {
        self.inner.lock().expect("SourceSet mutex poisoned").drain().map(|(_, s)| s).collect()
    }
}

/// Tunable knobs for an [`EventLoop`]. Mirrors the teacher's
/// `EventLoopConfig`/`Default` pattern.
#[derive(Debug, Clone, Copy)]
pub struct EventLoopConfig {
    /// Maximum number of readiness/completion events processed per
    /// `wait()` call.
    pub events_capacity: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        EventLoopConfig { events_capacity: 256 }
    }
}

/// A single-threaded event loop: one poller, one set of pending
/// operations, one set of registered sockets, one set of registered
/// threads.
pub struct EventLoop {
    poller: Poller,
    op_set: OpSet,
    thread_set: ThreadSet,
    source_set: SourceSet,
    running: AtomicBool,
    self_ref: Mutex<Option<WeakRef<EventLoop>>>,
    config: EventLoopConfig,
}

impl EventLoop {
    /// Builds a loop with the default configuration, ready to be `run()`.
    pub fn create() -> Result<Shared<Self>> {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Result<Shared<Self>> {
        let loop_ = Shared::new(EventLoop {
            poller: Poller::new()?,
            op_set: OpSet::new(),
            thread_set: ThreadSet::new(),
            source_set: SourceSet::new(),
            running: AtomicBool::new(true),
            self_ref: Mutex::new(None),
            config,
        });
        *loop_.self_ref.lock().expect("self_ref mutex poisoned") = Some(Shared::downgrade(&loop_));
        Ok(loop_)
    }

    fn weak_self(&self) -> WeakRef<EventLoop> {
        self.self_ref.lock().expect("self_ref mutex poisoned").clone().expect("loop not fully constructed")
    }

    /// Registers a bound, listening TCP socket and returns a handle other
    /// code can `accept()`/`close()` through.
    pub fn register_listener(&self, listener: TcpListener) -> Result<EventSocket> {
        self.register(RawSource::Listener(listener))
    }

    /// Registers a connected TCP socket and returns a handle other code
    /// can `read()`/`write()`/`close()` through.
    pub fn register_stream(&self, stream: TcpStream) -> Result<EventSocket> {
        self.register(RawSource::Stream(stream))
    }

    fn register(&self, raw: RawSource) -> Result<EventSocket> {
        let socket = raw.raw();
        let source = Shared::new(SocketSource::new(raw));
        let id = self.source_set.push(Shared::clone(&source));
        if let Err(err) = self.poller.register(socket, id, Interest::READ_ONLY) {
            self.source_set.remove(id);
            return Err(err);
        }
        Ok(EventSocket::new(self.weak_self(), id, source))
    }

    /// Starts `thread` as a registered actor on this loop and immediately
    /// dispatches [`Event::Start`] to it.
    pub fn start_thread<T>(&self, thread: Shared<T>) -> Result<()>
    where
        T: EventThread + 'static,
    {
        let dyn_thread: Shared<dyn EventThread> = thread;
        self.thread_set.push(Shared::clone(&dyn_thread));
        dyn_thread.handle(Event::Start)
    }

    /// Delivers a user-defined event to `thread` on the next loop tick.
    /// Safe to call from any thread.
    pub fn send_event(&self, thread: WeakRef<dyn EventThread>, payload: Box<dyn std::any::Any + Send>) -> Result<()> {
        self.op_set.try_push(Operation::SendEvent { thread, event: payload })?;
        self.poller.post()
    }

    /// Asks `thread` to stop. Safe to call from any thread.
    pub fn stop_thread(&self, thread: WeakRef<dyn EventThread>) -> Result<()> {
        self.op_set.try_push(Operation::StopThread { thread })?;
        self.poller.post()
    }

    pub(crate) fn enqueue_accept(&self, socket: &EventSocket, thread: WeakRef<dyn EventThread>) -> Result<()> {
        let id = self.op_set.try_push(Operation::Accept { source: socket.source_id, thread })?;
        socket.source.enqueue_in(id);
        Ok(())
    }

    pub(crate) fn enqueue_read(&self, socket: &EventSocket, thread: WeakRef<dyn EventThread>, max_len: usize) -> Result<()> {
        let id = self.op_set.try_push(Operation::Read { source: socket.source_id, thread, max_len })?;
        socket.source.enqueue_in(id);
        Ok(())
    }

    pub(crate) fn enqueue_write(&self, socket: &EventSocket, thread: WeakRef<dyn EventThread>, data: Vec<u8>) -> Result<()> {
        let id = self.op_set.try_push(Operation::Write {
            source: socket.source_id,
            thread,
            data,
            offset: 0,
        })?;
        let was_idle = socket.source.enqueue_out(id);
        if was_idle {
            self.poller.modify(socket.source.raw_socket(), socket.source_id, Interest::BOTH)?;
        }
        Ok(())
    }

    pub(crate) fn close_source(&self, id: SourceId) -> Result<()> {
        if let Some(source) = self.source_set.remove(id) {
            let raw = source.raw_socket();
            self.poller.deregister(raw)?;
        }
        Ok(())
    }

    /// Runs the loop on the calling thread until [`EventLoop::stop`] is
    /// called. Processes pending administrative operations
    /// (`SendEvent`/`StopThread`/`Close`) before dispatching I/O readiness
    /// for each source reported by the poller, matching the original's
    /// "try the op set first" ordering.
    pub fn run(&self) -> Result<()> {
        let mut events: Vec<PollEvent> = Vec::with_capacity(self.config.events_capacity);
        while self.running.load(Ordering::Acquire) {
            self.poller.wait(&mut events, Some(Duration::from_millis(250)))?;
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            for op in self.op_set.take_admin_ops() {
                self.dispatch_admin_op(op);
            }
            for ev in events.drain(..) {
                self.dispatch_source_readiness(ev);
            }
        }
        Ok(())
    }

    fn dispatch_admin_op(&self, op: Operation) {
        match op {
            Operation::SendEvent { thread, event } => {
                if let Some(thread) = thread.upgrade() {
                    if let Err(err) = thread.handle(Event::User(event)) {
                        log::warn!("user event handler returned an error: {err}");
                    }
                }
            }
            Operation::StopThread { thread } => {
                if let Some(thread) = thread.upgrade() {
                    thread.on_stop();
                }
            }
            _ => {}
        }
    }

    fn dispatch_source_readiness(&self, ev: PollEvent) {
        let Some(source) = self.source_set.get(ev.source) else { return };
        if ev.readable {
            if let Err(err) = source.handle_poll_in(&self.op_set) {
                log::warn!("poll-in handling failed: {err}");
            }
        }
        if ev.writable {
            if let Err(err) = source.handle_poll_out(&self.op_set) {
                log::warn!("poll-out handling failed: {err}");
            }
            if source.poll_out_is_empty() {
                if let Err(err) = self.poller.modify(source.raw_socket(), ev.source, Interest::READ_ONLY) {
                    log::warn!("failed to disarm write interest: {err}");
                }
            }
        }
    }

    /// Stops the loop. Every operation still pending anywhere in the loop
    /// -- across every source -- is dropped in one stroke (the
    /// "completion path" rule; see `DESIGN.md`), and every registered
    /// thread is notified via [`EventThread::on_stop`].
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.poller.post();
        self.op_set.close();
        for thread in self.thread_set.clear() {
            thread.on_stop();
        }
        self.source_set.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Echo {
        socket: Mutex<Option<EventSocket>>,
        weak: Mutex<Option<WeakRef<dyn EventThread>>>,
        reads: AtomicUsize,
    }

    impl EventThread for Echo {
        fn handle(&self, event: Event) -> Result<()> {
            let socket = self.socket.lock().expect("mutex").clone().expect("socket set");
            let weak = self.weak.lock().expect("mutex").clone().expect("weak set");
            match event {
                Event::Start => socket.read(weak, 64)?,
                Event::Read { data } => {
                    if !data.is_empty() {
                        self.reads.fetch_add(1, Ordering::Relaxed);
                        socket.write(weak, data)?;
                    }
                }
                Event::Write { .. } => {
                    let weak2 = self.weak.lock().expect("mutex").clone().expect("weak set");
                    socket.read(weak2, 64)?;
                }
                _ => {}
            }
            Ok(())
        }
    }

    #[test]
    fn register_listener_and_stream_assigns_distinct_sources() {
        let std_listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        drop(std_listener);

        let loop_ = EventLoop::create().unwrap();
        let listener = TcpListener::bind(addr).unwrap();
        let socket = loop_.register_listener(listener).unwrap();
        assert!(loop_.source_set.get(socket.source_id).is_some());
        socket.close().unwrap();
        assert!(loop_.source_set.get(socket.source_id).is_none());
    }

    #[test]
    fn echo_roundtrip_over_a_real_loop() {
        let std_listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        drop(std_listener);

        let loop_ = EventLoop::create().unwrap();
        let listener = TcpListener::bind(addr).unwrap();
        let listener_socket = loop_.register_listener(listener).unwrap();

        struct Acceptor {
            socket: EventSocket,
            weak: Mutex<Option<WeakRef<dyn EventThread>>>,
            loop_: WeakRef<EventLoop>,
        }
        impl EventThread for Acceptor {
            fn handle(&self, event: Event) -> Result<()> {
                let weak = self.weak.lock().expect("mutex").clone().expect("weak set");
                match event {
                    Event::Start => self.socket.accept(weak),
                    Event::Accept { socket } => {
                        let Some(loop_) = self.loop_.upgrade() else { return Ok(()) };
                        let event_socket = loop_.register_stream(socket)?;
                        let echo = Shared::new_cyclic(|w: &WeakRef<Echo>| {
                            let weak_dyn: WeakRef<dyn EventThread> = w.clone();
                            Echo {
                                socket: Mutex::new(Some(event_socket)),
                                weak: Mutex::new(Some(weak_dyn)),
                                reads: AtomicUsize::new(0),
                            }
                        });
                        loop_.start_thread(echo)?;
                        self.socket.accept(weak)
                    }
                    _ => Ok(()),
                }
            }
        }

        let acceptor = Shared::new_cyclic(|w: &WeakRef<Acceptor>| {
            let weak_dyn: WeakRef<dyn EventThread> = w.clone();
            Acceptor {
                socket: listener_socket,
                weak: Mutex::new(Some(weak_dyn)),
                loop_: loop_.weak_self(),
            }
        });
        loop_.start_thread(acceptor).unwrap();

        let handle = thread::spawn({
            let loop_ = Shared::clone(&loop_);
            move || loop_.run()
        });

        thread::sleep(Duration::from_millis(20));
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        use std::io::{Read, Write};
        client.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        loop_.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn stop_drains_pending_ops() {
        let loop_ = EventLoop::create().unwrap();
        let handle = thread::spawn({
            let loop_ = Shared::clone(&loop_);
            move || loop_.run()
        });
        thread::sleep(Duration::from_millis(20));
        loop_.stop();
        handle.join().unwrap().unwrap();
        assert_eq!(loop_.op_set.len(), 0);
    }
}
