//! Thin wrapper over Linux epoll.
//!
//! Client sockets are registered fire-once (`EPOLLONESHOT`): after an event
//! is delivered the descriptor stays silent until it is explicitly re-armed,
//! so at most one thread is ever acting on a connection.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use libc::{c_int, epoll_event};

/// Readiness a registration waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn bits(self) -> u32 {
        match self {
            Interest::Readable => libc::EPOLLIN as u32,
            Interest::Writable => libc::EPOLLOUT as u32,
        }
    }
}

/// An epoll instance.
#[derive(Debug)]
pub struct Poller {
    fd: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll_create1 just returned this descriptor and nothing
        // else owns it.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Registers `fd`. Peer half-close is always reported; `oneshot` disables
    /// the registration after its first event.
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest, oneshot: bool) -> io::Result<()> {
        let mut events = interest.bits() | libc::EPOLLRDHUP as u32;
        if oneshot {
            events |= libc::EPOLLONESHOT as u32;
        }
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, events)
    }

    /// Re-enables a fire-once registration for the given readiness.
    pub fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let events = interest.bits() | (libc::EPOLLONESHOT | libc::EPOLLRDHUP) as u32;
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, events)
    }

    /// Removes `fd`. A descriptor that is not registered is not an error.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut())
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Waits for events, blocking indefinitely when `timeout` is `None`.
    ///
    /// A wait interrupted by a signal returns zero events.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(c_int::MAX as u128) as c_int,
            None => -1,
        };
        events.len = 0;
        let res = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.len() as c_int,
                timeout_ms,
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(err);
        }
        events.len = res as usize;
        Ok(events.len)
    }

    fn ctl(&self, op: c_int, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        let mut event = epoll_event { events, u64: token };
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Buffer that `Poller::wait` fills.
pub struct Events {
    buf: Vec<epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.buf[..self.len].iter().map(|raw| {
            // epoll_event is packed on x86_64; copy the fields out
            let bits = raw.events;
            let token = raw.u64;
            Event { token, bits }
        })
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    token: u64,
    bits: u32,
}

impl Event {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_readable(&self) -> bool {
        self.bits & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.bits & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hang-up, half-close or socket error.
    pub fn is_closed(&self) -> bool {
        self.bits & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}
