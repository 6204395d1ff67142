//! `Server` (C8): a listening socket, an accept loop, and the set of
//! connected clients it has handed off handshakes for.
//!
//! Grounded on `original_source/core/src/core/websocket/Server3.cpp`:
//! one accept thread per server, each accepted socket placed on the next
//! loop of a [`ThreadedEventLoop`] (round-robin, per spec.md §4.8), a
//! mutex-guarded client set, and a `WebSocketNewConnection` notification
//! sent to the user's handler thread once a client's handshake succeeds.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::net::TcpListener;
use crate::shared::{Shared, WeakRef};
use crate::thread::{Event, EventSocket, EventThread};
use crate::threaded_loop::ThreadedEventLoop;
use crate::ws::client::{Client, Role, ServerHandshakeThread};
use crate::ws::config::ServerConfig;
use crate::ws::events::WsEvent;

/// A listening WebSocket endpoint. Accepted connections are registered on
/// a loop chosen by the given [`ThreadedEventLoop`]'s round-robin
/// placement; the accept socket itself lives on that collection's
/// primary loop.
pub struct Server {
    config: ServerConfig,
    local_addr: SocketAddr,
    accept_loop: WeakRef<crate::event_loop::EventLoop>,
    clients: Mutex<HashMap<usize, Shared<Client>>>,
    self_weak: Mutex<Option<WeakRef<Server>>>,
}

impl Server {
    /// Binds `config.host:config.port`, starts the accept thread on
    /// `threaded_loop`'s primary loop, and returns the running server.
    pub fn start(config: ServerConfig, threaded_loop: &Shared<ThreadedEventLoop>) -> Result<Shared<Self>> {
        let addr = format!("{}:{}", config.host, config.port)
            .to_socket_addrs()
            .map_err(Error::Io)?
            .next()
            .ok_or_else(|| Error::Handshake("could not resolve bind address".into()))?;

        let listener = TcpListener::bind(addr).map_err(Error::Io)?;
        let local_addr = listener.local_addr().map_err(Error::Io)?;

        let accept_loop = threaded_loop.primary();
        let listener_socket = accept_loop.register_listener(listener)?;

        let server = Shared::new_cyclic(|weak: &WeakRef<Server>| Server {
            config,
            local_addr,
            accept_loop: Shared::downgrade(&accept_loop),
            clients: Mutex::new(HashMap::new()),
            self_weak: Mutex::new(Some(weak.clone())),
        });

        let accept_thread = Shared::new_cyclic(|weak: &WeakRef<AcceptThread>| {
            let weak_dyn: WeakRef<dyn EventThread> = weak.clone();
            AcceptThread {
                server: Shared::clone(&server),
                socket: listener_socket,
                threaded_loop: Shared::clone(threaded_loop),
                self_weak: Mutex::new(Some(weak_dyn)),
            }
        });
        accept_loop.start_thread(accept_thread)?;

        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of clients whose handshake has completed and that have not
    /// yet terminated.
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("clients mutex poisoned").len()
    }

    fn weak_self(&self) -> WeakRef<Server> {
        self.self_weak.lock().expect("self_weak mutex poisoned").clone().expect("server not fully constructed")
    }

    /// Called by a [`ServerHandshakeThread`] once a client's handshake
    /// succeeds: records the client and dispatches
    /// `WebSocketNewConnection` to `config.handler`.
    pub(crate) fn notify_new_connection(&self, client: Shared<Client>) {
        let key = Shared::as_ptr(&client) as usize;
        self.clients.lock().expect("clients mutex poisoned").insert(key, Shared::clone(&client));

        let Some(loop_) = self.accept_loop.upgrade() else { return };
        if let Err(err) = loop_.send_event(self.config.handler.clone(), Box::new(WsEvent::NewConnection { client })) {
            log::warn!("failed to dispatch websocket new-connection event: {err}");
        }
    }

    /// Called by [`Client::terminate`] for a server-owned client: removes
    /// it from the tracked client set.
    pub(crate) fn forget(&self, client: &Shared<Client>) {
        let key = Shared::as_ptr(client) as usize;
        self.clients.lock().expect("clients mutex poisoned").remove(&key);
    }
}

struct AcceptThread {
    server: Shared<Server>,
    socket: EventSocket,
    threaded_loop: Shared<ThreadedEventLoop>,
    self_weak: Mutex<Option<WeakRef<dyn EventThread>>>,
}

impl AcceptThread {
    fn weak(&self) -> WeakRef<dyn EventThread> {
        self.self_weak.lock().expect("self_weak mutex poisoned").clone().expect("thread not fully constructed")
    }

    fn on_accept(&self, stream: crate::net::TcpStream) -> Result<()> {
        let loop_ = self.threaded_loop.next();
        let socket = loop_.register_stream(stream)?;
        let client = Client::new(
            Shared::downgrade(&loop_),
            socket,
            Role::Server { server: self.server.weak_self() },
            self.server.config.max_handshake_size,
            self.server.config.max_message_size,
            None,
        );
        ServerHandshakeThread::spawn(&loop_, client)
    }
}

impl EventThread for AcceptThread {
    fn handle(&self, event: Event) -> Result<()> {
        match event {
            Event::Start => self.socket.accept(self.weak()),
            Event::Accept { socket } => {
                if let Err(err) = self.on_accept(socket) {
                    log::warn!("failed to register an accepted websocket connection: {err}");
                }
                self.socket.accept(self.weak())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::frame::{self, OpCode};
    use crate::ws::handshake;
    use crate::ws::message::MessageKind;
    use std::io::{Read, Write};
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
    fn accepts_a_connection_and_echoes_one_message() {
        let threaded = ThreadedEventLoop::create(Some(1)).unwrap();

        let (tx, rx) = mpsc::channel::<WsEvent>();
        let handler: Shared<Sink> = Shared::new(Sink(Mutex::new(tx)));
        let handler_weak: WeakRef<dyn EventThread> = Shared::downgrade(&handler);

        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_handshake_size: crate::ws::config::DEFAULT_MAX_HANDSHAKE_SIZE,
            max_message_size: crate::ws::config::DEFAULT_MAX_MESSAGE_SIZE,
            handler: handler_weak,
        };

        let server = Server::start(config, &threaded).unwrap();
        let addr = server.local_addr();

        let tel = Shared::clone(&threaded);
        let handle = thread::spawn(move || tel.run());
        thread::sleep(Duration::from_millis(20));

        let mut client_stream = std::net::TcpStream::connect(addr).unwrap();
        let key = handshake::generate_key();
        let request = handshake::build_client_request("127.0.0.1", addr.port(), "/", &key);
        client_stream.write_all(request.as_bytes()).unwrap();

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            client_stream.read_exact(&mut byte).unwrap();
            response.push(byte[0]);
            if response.ends_with(b"\r\n\r\n") {
                break;
            }
        }
        let (parsed, _) = handshake::parse_response(&response).unwrap();
        handshake::validate_server_response(&parsed, &key).unwrap();

        let new_conn = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let client = match new_conn {
            WsEvent::NewConnection { client } => client,
            _ => panic!("expected a NewConnection event"),
        };
        assert_eq!(server.client_count(), 1);

        let handler_weak2: WeakRef<dyn EventThread> = Shared::downgrade(&handler);
        client.start_reading_messages(handler_weak2).unwrap();

        let masked = frame::encode(OpCode::Text, b"ping-pong", Some([9, 8, 7, 6]));
        client_stream.write_all(&masked).unwrap();

        let message = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        match message {
            WsEvent::Message { message, .. } => {
                assert_eq!(message.kind, MessageKind::Text);
                assert_eq!(message.payload, b"ping-pong");
            }
            other => panic!("unexpected event: {:?}", std::mem::discriminant(&other)),
        }

        threaded.stop();
        handle.join().unwrap().unwrap();
    }
}
