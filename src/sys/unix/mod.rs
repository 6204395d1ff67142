//! Linux selector: a thin, idiomatic wrapper over `epoll(7)`.
//!
//! Grounded on `examples/tokio-rs-mio/src/sys/unix/epoll.rs` (the
//! `epoll_create1`/`epoll_wait`/`epoll_ctl` wrapper shape) and on
//! `original_source/core/src/core/linux/EventLoop2.cpp`'s use of an
//! `eventfd` to let `stop`/`sendEventToThread`/`stopThread` wake a blocked
//! `epoll_wait` from another thread.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::net::RawSocket;
use crate::poll::{Interest, PollEvent};
use crate::token::SourceId;

const WAKE_TOKEN: u64 = u64::MAX;

pub(crate) struct Selector {
    epfd: RawFd,
    wake_fd: RawFd,
    tokens: Mutex<HashMap<u64, SourceId>>,
}

impl Selector {
    pub(crate) fn new() -> Result<Self> {
        let epfd = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })?;
        let wake_fd = cvt(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        if unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) } < 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epfd);
            }
            return Err(Error::Io(err));
        }

        Ok(Selector { epfd, wake_fd, tokens: Mutex::new(HashMap::new()) })
    }

    pub(crate) fn register(&self, socket: RawSocket, source: SourceId, interest: Interest) -> Result<()> {
        let token = source.as_raw();
        self.tokens.lock().expect("selector mutex poisoned").insert(token, source);

        let mut ev = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: token,
        };
        cvt(unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, socket, &mut ev) })?;
        Ok(())
    }

    pub(crate) fn deregister(&self, socket: RawSocket) -> Result<()> {
        cvt(unsafe {
            libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, socket, std::ptr::null_mut())
        })?;
        Ok(())
    }

    /// Re-arms an already-registered `socket` for `interest` via
    /// `EPOLL_CTL_MOD`. `source`'s raw id is re-supplied as the event's
    /// `u64` token, matching what `register` set it to originally.
    pub(crate) fn modify(&self, socket: RawSocket, source: SourceId, interest: Interest) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest_to_epoll(interest),
            u64: source.as_raw(),
        };
        cvt(unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, socket, &mut ev) })?;
        Ok(())
    }

    pub(crate) fn post(&self) -> Result<()> {
        let buf: u64 = 1;
        let n = unsafe {
            libc::write(self.wake_fd, &buf as *const u64 as *const libc::c_void, 8)
        };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                return Err(Error::Io(err));
            }
        }
        Ok(())
    }

    pub(crate) fn wait(&self, out: &mut Vec<PollEvent>, timeout: Option<Duration>) -> Result<()> {
        out.clear();
        let timeout_ms = timeout
            .map(|d| std::cmp::min(d.as_millis(), i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let mut raw = [libc::epoll_event { events: 0, u64: 0 }; 256];
        let n = loop {
            let n = unsafe {
                libc::epoll_wait(self.epfd, raw.as_mut_ptr(), raw.len() as i32, timeout_ms)
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Io(err));
            }
            break n as usize;
        };

        let tokens = self.tokens.lock().expect("selector mutex poisoned");
        for ev in &raw[..n] {
            if ev.u64 == WAKE_TOKEN {
                drain_wake(self.wake_fd);
                continue;
            }
            let Some(&source) = tokens.get(&ev.u64) else { continue };
            out.push(PollEvent {
                source,
                readable: ev.events & (libc::EPOLLIN as u32 | libc::EPOLLHUP as u32 | libc::EPOLLERR as u32) != 0,
                writable: ev.events & (libc::EPOLLOUT as u32) != 0,
            });
        }
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epfd);
        }
    }
}

fn drain_wake(fd: RawFd) {
    let mut buf = [0u8; 8];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
        if n <= 0 {
            break;
        }
    }
}

fn interest_to_epoll(interest: Interest) -> u32 {
    let mut events = 0u32;
    if interest.readable {
        events |= libc::EPOLLIN as u32;
    }
    if interest.writable {
        events |= libc::EPOLLOUT as u32;
    }
    events
}

fn cvt(ret: libc::c_int) -> Result<libc::c_int> {
    if ret < 0 {
        Err(Error::Io(std::io::Error::last_os_error()))
    } else {
        Ok(ret)
    }
}
