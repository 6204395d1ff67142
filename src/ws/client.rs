//! `Client` (C7): a connection wrapped in up to three [`EventThread`]s
//! strung in sequence -- handshake, then message reading, then
//! termination -- per spec.md §4.7.
//!
//! Grounded on `original_source/core/src/core/websocket/Client3.cpp` end
//! to end: the handshake/read-message phase split, the default close
//! handler's code table, and the masking rule (a client with no server
//! parent masks every outgoing frame).

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::net::TcpStream;
use crate::shared::{Shared, SharedFromThis, WeakRef};
use crate::thread::{Event, EventSocket, EventThread};
use crate::ws::close::{decode_close_payload, encode_close_payload, CloseCode};
use crate::ws::config::ClientConfig;
use crate::ws::events::WsEvent;
use crate::ws::frame::{self, OpCode};
use crate::ws::handshake;
use crate::ws::message::{Message, MessageKind, MessageParser};
use crate::ws::server::Server;

/// Size of each `read()` request issued while draining the handshake
/// buffer or the message stream. Frames larger than this simply take
/// more reads; it does not bound a message's size (`max_message_size`
/// does that).
const READ_CHUNK: usize = 8 * 1024;

/// Whether a [`Client`] is the connection's initiator (masks outgoing
/// frames, per RFC 6455 §5.3) or was accepted by a [`Server`] (never
/// masks; requires masked frames from the peer).
pub(crate) enum Role {
    Standalone,
    Server { server: WeakRef<Server> },
}

/// One WebSocket connection. Held behind `Shared<Client>` everywhere;
/// outlives any single phase thread, since the read-message phase and
/// the user's own references both keep it alive.
pub struct Client {
    socket: EventSocket,
    loop_ref: WeakRef<EventLoop>,
    role: Role,
    handler: Mutex<Option<WeakRef<dyn EventThread>>>,
    parser: Mutex<MessageParser>,
    /// Bytes read past the handshake's terminating blank line, fed to the
    /// message parser before the next live read (spec.md §4.7).
    pending_bytes: Mutex<Vec<u8>>,
    max_handshake_size: usize,
    terminated: AtomicBool,
    self_weak: Mutex<Option<WeakRef<Client>>>,
}

impl SharedFromThis<Client> for Client {
    fn weak_from_this(&self) -> WeakRef<Client> {
        self.self_weak.lock().expect("self_weak mutex poisoned").clone().expect("client not fully constructed")
    }
}

/// `Client` also implements [`EventThread`] purely so it can be handed to
/// [`EventSocket::write`] as the completion target for writes issued
/// directly from `write_text`/`write_close`/... (outside of any phase
/// thread's own read loop); nothing meaningful happens on a write
/// completion beyond logging a failure.
impl EventThread for Client {
    fn handle(&self, event: Event) -> Result<()> {
        if let Event::Write { .. } = event {
            // fire-and-forget; a short write here cannot be retried
            // without re-entering the phase that issued it.
        }
        Ok(())
    }
}

impl Client {
    pub(crate) fn new(
        loop_ref: WeakRef<EventLoop>,
        socket: EventSocket,
        role: Role,
        max_handshake_size: usize,
        max_message_size: u64,
        handler: Option<WeakRef<dyn EventThread>>,
    ) -> Shared<Self> {
        // A server reads frames sent by its client, which RFC 6455 §5.3
        // requires to be masked; a client reads frames sent by its server,
        // which must never be masked.
        let require_masked = Some(matches!(role, Role::Server { .. }));
        Shared::new_cyclic(|weak: &WeakRef<Client>| Client {
            socket,
            loop_ref,
            role,
            handler: Mutex::new(handler),
            parser: Mutex::new(MessageParser::new(max_message_size, require_masked)),
            pending_bytes: Mutex::new(Vec::new()),
            max_handshake_size,
            terminated: AtomicBool::new(false),
            self_weak: Mutex::new(Some(weak.clone())),
        })
    }

    fn dyn_weak(&self) -> WeakRef<dyn EventThread> {
        self.weak_from_this()
    }

    fn masks_outgoing(&self) -> bool {
        matches!(self.role, Role::Standalone)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Server-side entry point: called once the server's accepted
    /// `WebSocketNewConnection` notification has reached the user's
    /// handler thread, to start delivering `WebSocketMessage`/
    /// `WebSocketError`/`WebSocketDisconnected` events to `handler`.
    pub fn start_reading_messages(self: &Shared<Self>, handler: WeakRef<dyn EventThread>) -> Result<()> {
        *self.handler.lock().expect("handler mutex poisoned") = Some(handler);
        self.spawn_read_message_thread()
    }

    pub(crate) fn spawn_read_message_thread(self: &Shared<Self>) -> Result<()> {
        let Some(loop_) = self.loop_ref.upgrade() else {
            return Err(Error::Gone("event loop"));
        };
        let thread = Shared::new_cyclic(|weak: &WeakRef<ReadMessageThread>| ReadMessageThread {
            client: Shared::clone(self),
            self_weak: Mutex::new(weak.clone()),
        });
        loop_.start_thread(thread)
    }

    fn dispatch_ws_event(&self, event: WsEvent) {
        let Some(handler) = self.handler.lock().expect("handler mutex poisoned").clone() else {
            return;
        };
        let Some(loop_) = self.loop_ref.upgrade() else { return };
        if let Err(err) = loop_.send_event(handler, Box::new(event)) {
            log::warn!("failed to dispatch websocket event: {err}");
        }
    }

    /// Idempotent: deregisters the socket, notifies the handler with
    /// `Disconnected`, and (for a server-owned client) asks the server to
    /// forget this connection. Mirrors spec.md §4.7's "Termination"
    /// phase; since Rust's `Drop` cannot hand out a fresh `Shared<Self>`
    /// once the strong count reaches zero, this is invoked explicitly by
    /// whichever phase thread observes the connection ending rather than
    /// from a `Drop` impl (see `DESIGN.md`'s Open Questions).
    pub fn terminate(self: &Shared<Self>) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.socket.close();
        self.dispatch_ws_event(WsEvent::Disconnected { client: Shared::clone(self) });
        if let Role::Server { server } = &self.role {
            if let Some(server) = server.upgrade() {
                server.forget(self);
            }
        }
    }

    fn write_frame(self: &Shared<Self>, opcode: OpCode, mut payload: Vec<u8>) -> Result<()> {
        if opcode.is_control() && payload.len() > 125 {
            payload.truncate(125);
        }
        let mask = if self.masks_outgoing() { Some(random_mask()) } else { None };
        let bytes = frame::encode(opcode, &payload, mask);
        self.socket.write(self.dyn_weak(), bytes)
    }

    pub fn write_text(self: &Shared<Self>, text: &str) -> Result<()> {
        self.write_frame(OpCode::Text, text.as_bytes().to_vec())
    }

    pub fn write_binary(self: &Shared<Self>, data: &[u8]) -> Result<()> {
        self.write_frame(OpCode::Binary, data.to_vec())
    }

    pub fn write_ping(self: &Shared<Self>, payload: &[u8]) -> Result<()> {
        self.write_frame(OpCode::Ping, payload.to_vec())
    }

    pub fn write_pong(self: &Shared<Self>, payload: &[u8]) -> Result<()> {
        self.write_frame(OpCode::Pong, payload.to_vec())
    }

    pub fn write_close(self: &Shared<Self>, code: u16, reason: Option<&str>) -> Result<()> {
        let payload = encode_close_payload(CloseCode(code), reason);
        self.write_frame(OpCode::Close, payload)
    }

    /// Opens a client-initiated connection: resolves and (blocking)
    /// connects the TCP socket per the resolved Open Question in
    /// `DESIGN.md` (`Client3::connect`'s behaviour), then drives the
    /// opening handshake asynchronously on `loop_`. `on_ready` is called
    /// exactly once, with the connected client on success or the failure
    /// reason; `handler` starts receiving `WebSocketMessage`/
    /// `WebSocketError`/`WebSocketDisconnected` events as soon as the
    /// handshake completes (no separate `start_reading_messages` call is
    /// needed on the client side, unlike the server side -- see
    /// `DESIGN.md`).
    pub fn connect(
        loop_: &Shared<EventLoop>,
        config: ClientConfig,
        handler: WeakRef<dyn EventThread>,
        on_ready: impl FnOnce(Result<Shared<Client>>) + Send + 'static,
    ) -> Result<()> {
        let url = handshake::WsUrl::parse(&config.url)?;
        let addr = (url.host.as_str(), url.port)
            .to_socket_addrs()
            .map_err(Error::Io)?
            .next()
            .ok_or_else(|| Error::Handshake("could not resolve host".into()))?;
        let stream = TcpStream::connect(addr).map_err(Error::Io)?;
        let socket = loop_.register_stream(stream)?;

        let client = Client::new(
            Shared::downgrade(loop_),
            socket,
            Role::Standalone,
            config.max_handshake_size,
            config.max_message_size,
            Some(handler),
        );

        let key = handshake::generate_key();
        let request = handshake::build_client_request(&url.host, url.port, &url.path, &key);
        let thread = Shared::new_cyclic(|weak: &WeakRef<ClientHandshakeThread>| ClientHandshakeThread {
            client: Shared::clone(&client),
            key,
            request: Mutex::new(Some(request)),
            buf: Mutex::new(Vec::new()),
            on_ready: Mutex::new(Some(Box::new(on_ready))),
            self_weak: Mutex::new(weak.clone()),
        });
        loop_.start_thread(thread)
    }
}

fn random_mask() -> [u8; 4] {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Phase 1 (server side): reads the HTTP Upgrade request, validates it,
/// and writes the `101 Switching Protocols` response.
pub(crate) struct ServerHandshakeThread {
    client: Shared<Client>,
    buf: Mutex<Vec<u8>>,
    leftover: Mutex<Vec<u8>>,
    self_weak: Mutex<Option<WeakRef<dyn EventThread>>>,
}

impl ServerHandshakeThread {
    pub(crate) fn spawn(loop_: &Shared<EventLoop>, client: Shared<Client>) -> Result<()> {
        let thread = Shared::new_cyclic(|weak: &WeakRef<ServerHandshakeThread>| {
            let weak_dyn: WeakRef<dyn EventThread> = weak.clone();
            ServerHandshakeThread {
                client,
                buf: Mutex::new(Vec::new()),
                leftover: Mutex::new(Vec::new()),
                self_weak: Mutex::new(Some(weak_dyn)),
            }
        });
        loop_.start_thread(thread)
    }

    fn weak(&self) -> WeakRef<dyn EventThread> {
        self.self_weak.lock().expect("self_weak mutex poisoned").clone().expect("thread not fully constructed")
    }

    fn request_more(&self) -> Result<()> {
        self.client.socket.read(self.weak(), READ_CHUNK)
    }

    fn stop_self(&self) {
        if let Some(loop_) = self.client.loop_ref.upgrade() {
            let _ = loop_.stop_thread(self.weak());
        }
    }

    fn fail(&self, reason: &str) {
        let response = handshake::build_error_response(reason);
        let _ = self.client.socket.write(self.weak(), response.into_bytes());
        self.client.terminate();
        self.stop_self();
    }

    fn on_read(&self, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            self.client.terminate();
            self.stop_self();
            return Ok(());
        }
        let mut buf = self.buf.lock().expect("buf mutex poisoned");
        buf.extend_from_slice(&data);
        if buf.len() > self.client.max_handshake_size {
            drop(buf);
            self.fail("handshake request too large");
            return Ok(());
        }
        let Some(header_end) = find_terminator(&buf) else {
            drop(buf);
            return self.request_more();
        };

        let (request, end) = match handshake::parse_request(&buf[..header_end + 4]) {
            Ok(parsed) => parsed,
            Err(err) => {
                drop(buf);
                self.fail(&err.to_string());
                return Ok(());
            }
        };
        let key = match handshake::require_handshake_key(&request) {
            Ok(key) => key,
            Err(err) => {
                drop(buf);
                self.fail(&err.to_string());
                return Ok(());
            }
        };
        *self.leftover.lock().expect("leftover mutex poisoned") = buf[end..].to_vec();
        drop(buf);

        let accept = handshake::compute_accept(&key);
        let response = handshake::build_server_response(&accept);
        self.client.socket.write(self.weak(), response.into_bytes())
    }

    fn on_written(&self) -> Result<()> {
        *self.client.pending_bytes.lock().expect("pending_bytes mutex poisoned") =
            std::mem::take(&mut *self.leftover.lock().expect("leftover mutex poisoned"));
        if let Role::Server { server } = &self.client.role {
            if let Some(server) = server.upgrade() {
                server.notify_new_connection(Shared::clone(&self.client));
            }
        }
        self.stop_self();
        Ok(())
    }
}

impl EventThread for ServerHandshakeThread {
    fn handle(&self, event: Event) -> Result<()> {
        match event {
            Event::Start => self.request_more(),
            Event::Read { data } => self.on_read(data),
            Event::Write { .. } => self.on_written(),
            _ => Ok(()),
        }
    }
}

/// Phase 1 (client side): writes the opening request, reads the server's
/// response, and validates `Sec-WebSocket-Accept`.
pub(crate) struct ClientHandshakeThread {
    client: Shared<Client>,
    key: String,
    request: Mutex<Option<String>>,
    buf: Mutex<Vec<u8>>,
    on_ready: Mutex<Option<Box<dyn FnOnce(Result<Shared<Client>>) + Send>>>,
    self_weak: Mutex<Option<WeakRef<dyn EventThread>>>,
}

impl ClientHandshakeThread {
    fn weak(&self) -> WeakRef<dyn EventThread> {
        self.self_weak.lock().expect("self_weak mutex poisoned").clone().expect("thread not fully constructed")
    }

    fn stop_self(&self) {
        if let Some(loop_) = self.client.loop_ref.upgrade() {
            let _ = loop_.stop_thread(self.weak());
        }
    }

    fn finish(&self, result: Result<Shared<Client>>) {
        if let Some(on_ready) = self.on_ready.lock().expect("on_ready mutex poisoned").take() {
            on_ready(result);
        }
    }

    fn fail(&self, reason: String) {
        let response = handshake::build_error_response(&reason);
        let _ = self.client.socket.write(self.weak(), response.into_bytes());
        self.client.terminate();
        self.finish(Err(Error::Handshake(reason)));
        self.stop_self();
    }

    fn on_read(&self, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            self.fail("server closed the connection during handshake".into());
            return Ok(());
        }
        let mut buf = self.buf.lock().expect("buf mutex poisoned");
        buf.extend_from_slice(&data);
        if buf.len() > self.client.max_handshake_size {
            drop(buf);
            self.fail("handshake response too large".into());
            return Ok(());
        }
        let Some(header_end) = find_terminator(&buf) else {
            drop(buf);
            return self.client.socket.read(self.weak(), READ_CHUNK);
        };

        let (response, end) = match handshake::parse_response(&buf[..header_end + 4]) {
            Ok(parsed) => parsed,
            Err(err) => {
                drop(buf);
                self.fail(err.to_string());
                return Ok(());
            }
        };
        if let Err(err) = handshake::validate_server_response(&response, &self.key) {
            drop(buf);
            self.fail(err.to_string());
            return Ok(());
        }
        *self.client.pending_bytes.lock().expect("pending_bytes mutex poisoned") = buf[end..].to_vec();
        drop(buf);

        self.finish(Ok(Shared::clone(&self.client)));
        self.client.spawn_read_message_thread()?;
        self.stop_self();
        Ok(())
    }
}

impl EventThread for ClientHandshakeThread {
    fn handle(&self, event: Event) -> Result<()> {
        match event {
            Event::Start => {
                let request = self.request.lock().expect("request mutex poisoned").take().expect("set at construction");
                self.client.socket.write(self.weak(), request.into_bytes())
            }
            Event::Write { .. } => self.client.socket.read(self.weak(), READ_CHUNK),
            Event::Read { data } => self.on_read(data),
            _ => Ok(()),
        }
    }
}

/// Phase 2: drains the message stream through the parser, dispatching
/// `WebSocketMessage`/`WebSocketError` to the handler and auto-replying
/// to `PING`/`CLOSE` per spec.md §4.7's default close handler.
pub(crate) struct ReadMessageThread {
    client: Shared<Client>,
    self_weak: Mutex<WeakRef<dyn EventThread>>,
}

impl ReadMessageThread {
    fn weak(&self) -> WeakRef<dyn EventThread> {
        self.self_weak.lock().expect("self_weak mutex poisoned").clone()
    }

    fn request_read(&self) -> Result<()> {
        self.client.socket.read(self.weak(), READ_CHUNK)
    }

    fn stop_self(&self) {
        if let Some(loop_) = self.client.loop_ref.upgrade() {
            let _ = loop_.stop_thread(self.weak());
        }
    }

    fn process(&self, data: &[u8]) -> Result<()> {
        let mut messages = Vec::new();
        let result = {
            let mut parser = self.client.parser.lock().expect("parser mutex poisoned");
            parser.consume(data, |m| messages.push(m))
        };
        for message in messages {
            self.handle_message(message);
            if self.client.is_terminated() {
                return Ok(());
            }
        }
        if let Err(err) = result {
            let code = err.close_code().unwrap_or(1002);
            self.client.dispatch_ws_event(WsEvent::Error {
                client: Shared::clone(&self.client),
                code,
                human: err.to_string(),
            });
            let _ = self.client.write_close(code, Some(&err.to_string()));
            self.client.terminate();
            self.stop_self();
        }
        Ok(())
    }

    fn handle_message(&self, message: Message) {
        let kind = message.kind;
        self.client.dispatch_ws_event(WsEvent::Message {
            client: Shared::clone(&self.client),
            message: message.clone(),
        });
        match kind {
            MessageKind::Ping => {
                let _ = self.client.write_pong(&message.payload);
            }
            MessageKind::Close => {
                let reply = match decode_close_payload(&message.payload) {
                    Ok(_) => CloseCode::NORMAL,
                    Err(code) => code,
                };
                let _ = self.client.write_close(reply.0, None);
                self.client.terminate();
                self.stop_self();
            }
            MessageKind::Text | MessageKind::Binary | MessageKind::Pong => {}
        }
    }

    fn on_read(&self, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            self.client.terminate();
            self.stop_self();
            return Ok(());
        }
        self.process(&data)?;
        if !self.client.is_terminated() {
            self.request_read()?;
        }
        Ok(())
    }
}

impl EventThread for ReadMessageThread {
    fn handle(&self, event: Event) -> Result<()> {
        match event {
            Event::Start => {
                let initial = std::mem::take(&mut *self.client.pending_bytes.lock().expect("pending_bytes mutex poisoned"));
                if !initial.is_empty() {
                    self.process(&initial)?;
                }
                if !self.client.is_terminated() {
                    self.request_read()?;
                }
                Ok(())
            }
            Event::Read { data } => self.on_read(data),
            _ => Ok(()),
        }
    }

    fn on_stop(&self) {
        self.client.terminate();
    }
}

/// Finds the end offset (index of the first `\r`) of the terminating
/// `\r\n\r\n`, if it has fully arrived.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::ws::config::ServerConfig;
    use std::net::TcpListener as StdListener;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct Sink(Mutex<mpsc::Sender<WsEvent>>);
    impl EventThread for Sink {
        fn handle(&self, event: Event) -> Result<()> {
            if let Event::User(payload) = event {
                if let Ok(ws_event) = payload.downcast::<WsEvent>() {
                    let _ = self.0.lock().expect("mutex").send(*ws_event);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn echo_text_roundtrip_over_a_real_handshake() {
        // Exercises the client-initiated side (`Client::connect`) against a
        // plain std-TCP fake server, which plays the server role by hand:
        // read the Upgrade request, answer with `101`, then exchange one
        // masked/unmasked frame in each direction.
        let fake_server = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = fake_server.local_addr().unwrap();

        let server_thread = thread::spawn(move || {
            use std::io::{Read, Write};
            let (mut stream, _) = fake_server.accept().unwrap();
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                stream.read_exact(&mut byte).unwrap();
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            let (request, _) = handshake::parse_request(&buf).unwrap();
            let key = handshake::require_handshake_key(&request).unwrap();
            let accept = handshake::compute_accept(&key);
            let response = handshake::build_server_response(&accept);
            stream.write_all(response.as_bytes()).unwrap();

            // A server never masks outgoing frames.
            let unmasked = frame::encode(OpCode::Text, b"hello", None);
            stream.write_all(&unmasked).unwrap();

            // ...and must reject anything but a masked incoming frame.
            let mut echoed = vec![0u8; 64];
            let n = stream.read(&mut echoed).unwrap();
            (echoed[..n].to_vec(), stream)
        });

        let loop_ = EventLoop::create().unwrap();
        let handle = thread::spawn({
            let loop_ = Shared::clone(&loop_);
            move || loop_.run()
        });

        let (tx, rx) = mpsc::channel::<WsEvent>();
        let handler: Shared<Sink> = Shared::new(Sink(Mutex::new(tx)));
        let handler_weak: WeakRef<dyn EventThread> = Shared::downgrade(&handler);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<Shared<Client>>>();
        let config = ClientConfig::new(format!("ws://127.0.0.1:{}/", addr.port()));
        Client::connect(&loop_, config, handler_weak, move |result| {
            let _ = ready_tx.send(result);
        })
        .unwrap();

        let client = ready_rx.recv_timeout(Duration::from_secs(1)).unwrap().unwrap();

        let message_event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match message_event {
            WsEvent::Message { message, .. } => {
                assert_eq!(message.kind, MessageKind::Text);
                assert_eq!(message.payload, b"hello");
            }
            other => panic!("expected Message, got {other:?}"),
        }

        client.write_text("hello").unwrap();
        let (echoed, _stream) = server_thread.join().unwrap();
        let mut parser = crate::ws::frame::FrameParser::new(1 << 20, None);
        let (_, frame) = parser.consume(&echoed).unwrap();
        let frame = frame.expect("a complete frame");
        assert!(frame.header.mask.is_some(), "client must mask outgoing frames");
        assert_eq!(frame.payload, b"hello");

        loop_.stop();
        handle.join().unwrap().unwrap();
    }

    // Keeps `ServerConfig` reachable from this test module without an
    // unused-import warning on builds where only `Client` is exercised.
    #[allow(dead_code)]
    fn _uses_server_config(_: &ServerConfig) {}
}
