//! Signal delivery through the event loop.
//!
//! Signal handlers only write the signal number as a single byte into a
//! non-blocking socket pair whose read end is registered with the poller.
//! The reactor then handles the signal between events like any other input.

use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use libc::c_int;

/// Write end used by the process-wide signal handler; -1 when none.
static SIGNAL_FD: AtomicI32 = AtomicI32::new(-1);

/// A signal the reactor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Periodic tick that triggers the expiry sweep.
    Alarm,
    /// Request for a graceful shutdown.
    Terminate,
}

impl Signal {
    fn to_byte(self) -> u8 {
        match self {
            Signal::Alarm => libc::SIGALRM as u8,
            Signal::Terminate => libc::SIGTERM as u8,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match c_int::from(byte) {
            libc::SIGALRM => Some(Signal::Alarm),
            libc::SIGTERM => Some(Signal::Terminate),
            _ => None,
        }
    }
}

/// A non-blocking socket pair used to wake the poller from another context.
#[derive(Debug)]
pub(crate) struct WakePipe {
    reader: UnixStream,
    writer: Arc<UnixStream>,
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            reader,
            writer: Arc::new(writer),
        })
    }

    /// Descriptor to register with the poller.
    pub(crate) fn reader_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub(crate) fn writer(&self) -> Arc<UnixStream> {
        Arc::clone(&self.writer)
    }

    /// Reads every pending byte.
    pub(crate) fn drain(&self) -> io::Result<Vec<u8>> {
        let mut pending = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(pending)
    }
}

/// Writes one byte, treating a full socket buffer as delivered: the reader
/// already has a wakeup pending.
pub(crate) fn notify(writer: &UnixStream, byte: u8) -> io::Result<()> {
    loop {
        match (&*writer).write(&[byte]) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// The channel SIGALRM and SIGTERM arrive on.
#[derive(Debug)]
pub struct SignalChannel {
    pipe: WakePipe,
    installed: bool,
}

impl SignalChannel {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            pipe: WakePipe::new()?,
            installed: false,
        })
    }

    /// Routes SIGALRM and SIGTERM into this channel and ignores SIGPIPE.
    ///
    /// Process-wide: only one channel can be installed at a time.
    pub fn install(&mut self) -> io::Result<()> {
        SIGNAL_FD.store(self.pipe.writer.as_raw_fd(), Ordering::SeqCst);
        set_handler(libc::SIGPIPE, libc::SIG_IGN)?;
        set_handler(libc::SIGALRM, on_signal as *const () as libc::sighandler_t)?;
        set_handler(libc::SIGTERM, on_signal as *const () as libc::sighandler_t)?;
        self.installed = true;
        Ok(())
    }

    pub fn raw_fd(&self) -> RawFd {
        self.pipe.reader_fd()
    }

    /// A handle that injects signals without going through the kernel.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            writer: self.pipe.writer(),
        }
    }

    /// Decodes every signal received since the last call.
    pub fn drain(&self) -> io::Result<Vec<Signal>> {
        Ok(self
            .pipe
            .drain()?
            .into_iter()
            .filter_map(Signal::from_byte)
            .collect())
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        if self.installed {
            let fd = self.pipe.writer.as_raw_fd();
            let _ = SIGNAL_FD.compare_exchange(fd, -1, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

/// Arms a one-shot SIGALRM `timeslot` from now, rounded to whole seconds.
pub fn schedule_alarm(timeslot: Duration) {
    let secs = timeslot.as_secs().clamp(1, u64::from(libc::c_uint::MAX));
    unsafe {
        libc::alarm(secs as libc::c_uint);
    }
}

/// Cloneable control handle for a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    writer: Arc<UnixStream>,
}

impl ServerHandle {
    /// Asks the reactor to shut down, as SIGTERM does.
    pub fn shutdown(&self) -> io::Result<()> {
        notify(&self.writer, Signal::Terminate.to_byte())
    }

    /// Triggers an expiry sweep, as SIGALRM does.
    pub fn tick(&self) -> io::Result<()> {
        notify(&self.writer, Signal::Alarm.to_byte())
    }
}

fn set_handler(signal: c_int, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

extern "C" fn on_signal(signal: c_int) {
    // Only async-signal-safe calls in here
    unsafe {
        let errno = *libc::__errno_location();
        let fd = SIGNAL_FD.load(Ordering::SeqCst);
        if fd >= 0 {
            let byte = signal as u8;
            libc::send(
                fd,
                &byte as *const u8 as *const libc::c_void,
                1,
                libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL,
            );
        }
        *libc::__errno_location() = errno;
    }
}
