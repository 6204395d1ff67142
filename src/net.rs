//! Thin wrappers over `std::net` that add the non-blocking/no-delay setup
//! and raw-handle access an [`crate::event_loop::EventLoop`] needs to
//! register a socket with the platform poller.
//!
//! Grounded on `examples/tokio-rs-mio`'s `net::{TcpListener, TcpStream}`
//! shape: a struct around the std type, `From`/raw-handle accessors, and
//! socket options applied once at construction rather than re-checked on
//! every call.

use std::io::{self, Read, Write};
use std::net::{self, SocketAddr};

#[cfg(unix)]
pub(crate) type RawSocket = std::os::unix::io::RawFd;
#[cfg(windows)]
pub(crate) type RawSocket = std::os::windows::io::RawSocket;

/// A listening TCP socket registered with an event loop.
pub struct TcpListener {
    inner: net::TcpListener,
}

impl TcpListener {
    /// Binds and configures `addr` for non-blocking accept.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = net::TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(TcpListener { inner })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub(crate) fn accept_nonblocking(&mut self) -> io::Result<TcpStream> {
        let (stream, _addr) = self.inner.accept()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(TcpStream { inner: stream })
    }

    #[cfg(unix)]
    pub(crate) fn raw_socket(&self) -> RawSocket {
        use std::os::unix::io::AsRawFd;
        self.inner.as_raw_fd()
    }

    #[cfg(windows)]
    pub(crate) fn raw_socket(&self) -> RawSocket {
        use std::os::windows::io::AsRawSocket;
        self.inner.as_raw_socket()
    }
}

/// A connected TCP socket registered with an event loop.
pub struct TcpStream {
    inner: net::TcpStream,
}

impl TcpStream {
    /// Connects (blocking) and configures the resulting socket for
    /// non-blocking, low-latency use inside a loop.
    ///
    /// The blocking connect mirrors `Client3::connect` in the original:
    /// the handshake that follows needs the connection established before
    /// the socket is handed to the loop, and the crate does not implement
    /// non-blocking connect-in-progress (`EINPROGRESS`) tracking.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let inner = net::TcpStream::connect(addr)?;
        inner.set_nonblocking(true)?;
        inner.set_nodelay(true)?;
        Ok(TcpStream { inner })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        Ok(TcpStream { inner: self.inner.try_clone()? })
    }

    #[cfg(unix)]
    pub(crate) fn raw_socket(&self) -> RawSocket {
        use std::os::unix::io::AsRawFd;
        self.inner.as_raw_fd()
    }

    #[cfg(windows)]
    pub(crate) fn raw_socket(&self) -> RawSocket {
        use std::os::windows::io::AsRawSocket;
        self.inner.as_raw_socket()
    }
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
