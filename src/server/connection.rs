//! Per-connection state: buffers, parse cursors and the response in flight.
//!
//! A `Connection` is owned by exactly one party at a time. The reactor does
//! the socket reads, a worker runs [`Connection::process`] on the filled
//! buffer, and the reactor performs the writes. Slots are reused across
//! accepted sockets, so the buffers are allocated once.

use std::fs;
use std::io::{self, IoSlice, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::parser::{ParseStatus, RequestParser};
use crate::server::error::Error;
use crate::server::file::{FileStat, MappedFile, resolve_path};
use crate::server::response::{HttpResponse, StatusCode};
use crate::server::timer::TimerId;

/// Result of draining the socket into the read buffer.
#[derive(Debug)]
pub enum ReadOutcome {
    /// New bytes (possibly none) are in the buffer; the socket would block.
    Ready,
    /// The peer closed its side.
    PeerClosed,
    /// The buffer was already full before this read.
    BufferFull,
    Failed(io::Error),
}

/// Outcome of parsing and resolving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// The request is not complete yet.
    Incomplete,
    /// The target is mapped and ready to send.
    FileReady,
    BadRequest,
    NotFound,
    Forbidden,
    InternalError,
}

impl HttpCode {
    /// The status sent for a finished request.
    pub fn status(self) -> Option<StatusCode> {
        match self {
            HttpCode::Incomplete => None,
            HttpCode::FileReady => Some(StatusCode::Ok),
            HttpCode::BadRequest => Some(StatusCode::BadRequest),
            HttpCode::NotFound => Some(StatusCode::NotFound),
            HttpCode::Forbidden => Some(StatusCode::Forbidden),
            HttpCode::InternalError => Some(StatusCode::InternalServerError),
        }
    }
}

/// What the worker hands back to the reactor.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Wait for more bytes.
    Incomplete,
    /// A response is staged; wait for the socket to become writable.
    Respond(StatusCode),
    /// No response could be staged; the connection must be closed.
    Failed(Error),
}

/// Result of one write attempt.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The socket buffer is full; wait for writability.
    WouldBlock,
    /// The response is out and the connection was reset for the next request.
    KeepAlive,
    /// The response is out and the client did not ask for keep-alive.
    Close,
    Failed(io::Error),
}

/// One client connection.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    doc_root: Arc<Path>,

    read_buf: Box<[u8]>,
    read_idx: usize,
    parser: RequestParser,
    keep_alive: bool,

    write_buf: Box<[u8]>,
    write_idx: usize,
    bytes_to_send: usize,
    bytes_have_sent: usize,

    real_file: PathBuf,
    file_stat: Option<FileStat>,
    file: Option<MappedFile>,

    /// Expiry entry owned by the reactor.
    pub(crate) timer: Option<TimerId>,
}

impl Connection {
    pub fn new(doc_root: Arc<Path>, read_buffer_size: usize, write_buffer_size: usize) -> Self {
        Self {
            stream: None,
            peer: None,
            doc_root,
            read_buf: vec![0; read_buffer_size].into_boxed_slice(),
            read_idx: 0,
            parser: RequestParser::new(),
            keep_alive: false,
            write_buf: vec![0; write_buffer_size].into_boxed_slice(),
            write_idx: 0,
            bytes_to_send: 0,
            bytes_have_sent: 0,
            real_file: PathBuf::new(),
            file_stat: None,
            file: None,
            timer: None,
        }
    }

    /// Binds a freshly accepted, non-blocking socket to this slot.
    pub fn init(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.stream = Some(stream);
        self.peer = Some(peer);
        self.timer = None;
        self.reset();
    }

    /// Clears all per-request state; the socket stays open.
    pub fn reset(&mut self) {
        self.read_idx = 0;
        self.parser.reset();
        self.keep_alive = false;
        self.write_idx = 0;
        self.bytes_to_send = 0;
        self.bytes_have_sent = 0;
        self.real_file.clear();
        self.file_stat = None;
        self.file = None;
        self.read_buf.fill(0);
        self.write_buf.fill(0);
    }

    /// Closes the socket. Returns `true` only for the call that closed it.
    pub fn close(&mut self) -> bool {
        let Some(stream) = self.stream.take() else {
            return false;
        };
        if let Some(peer) = self.peer.take() {
            debug!("Closing connection from {peer}");
        }
        drop(stream);
        self.reset();
        true
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Filled prefix of the read buffer.
    pub fn read_idx(&self) -> usize {
        self.read_idx
    }

    pub fn bytes_to_send(&self) -> usize {
        self.bytes_to_send
    }

    pub fn bytes_have_sent(&self) -> usize {
        self.bytes_have_sent
    }

    pub fn real_file(&self) -> &Path {
        &self.real_file
    }

    pub fn file_stat(&self) -> Option<FileStat> {
        self.file_stat
    }

    pub fn has_mapping(&self) -> bool {
        self.file.is_some()
    }

    /// Reads until the socket would block or the buffer is full.
    pub fn read(&mut self) -> ReadOutcome {
        let Some(stream) = self.stream.as_ref() else {
            return ReadOutcome::Failed(io::ErrorKind::NotConnected.into());
        };
        if self.read_idx >= self.read_buf.len() {
            return ReadOutcome::BufferFull;
        }
        loop {
            match (&*stream).read(&mut self.read_buf[self.read_idx..]) {
                Ok(0) => return ReadOutcome::PeerClosed,
                Ok(n) => {
                    self.read_idx += n;
                    if self.read_idx == self.read_buf.len() {
                        return ReadOutcome::Ready;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Parses what has been read so far and, once the request is complete,
    /// stages the response. Runs on a worker thread.
    pub fn process(&mut self) -> ProcessOutcome {
        let Some(status) = self.process_read().status() else {
            return ProcessOutcome::Incomplete;
        };
        match self.process_write(status) {
            Ok(()) => ProcessOutcome::Respond(status),
            Err(e) => {
                self.file = None;
                ProcessOutcome::Failed(e)
            }
        }
    }

    fn process_read(&mut self) -> HttpCode {
        match self.parser.parse(&self.read_buf[..self.read_idx]) {
            Ok(ParseStatus::Incomplete) => HttpCode::Incomplete,
            Ok(ParseStatus::Complete) => {
                self.keep_alive = self.parser.keep_alive();
                self.do_request()
            }
            Err(e) => {
                debug!("Rejecting request from {:?}: {e}", self.peer);
                self.keep_alive = self.parser.keep_alive();
                HttpCode::BadRequest
            }
        }
    }

    /// Resolves the target against the document root and maps it.
    fn do_request(&mut self) -> HttpCode {
        let Some(path) = self.parser.path() else {
            return HttpCode::BadRequest;
        };
        let Some(real_file) = resolve_path(&self.doc_root, path) else {
            return HttpCode::Forbidden;
        };
        self.real_file = real_file;

        let stat = match fs::metadata(&self.real_file) {
            Ok(meta) => FileStat::from(&meta),
            Err(_) => return HttpCode::NotFound,
        };
        self.file_stat = Some(stat);
        if !stat.is_other_readable() {
            return HttpCode::Forbidden;
        }
        if stat.is_dir {
            return HttpCode::BadRequest;
        }

        match MappedFile::open(&self.real_file) {
            Ok(file) => {
                self.file = Some(file);
                HttpCode::FileReady
            }
            Err(e) => {
                warn!("Failed to map {}: {e}", self.real_file.display());
                HttpCode::InternalError
            }
        }
    }

    /// Writes the head (and canned body for errors) into the write buffer
    /// and sets up the byte counters for the vectored write.
    fn process_write(&mut self, status: StatusCode) -> Result<(), Error> {
        let body_len = self.file.as_ref().map_or(0, MappedFile::len);
        let response = match status {
            StatusCode::Ok => HttpResponse::file(body_len),
            _ => HttpResponse::new(status),
        }
        .with_keep_alive(self.keep_alive);

        self.write_idx = match status {
            StatusCode::Ok => response.write_head(&mut self.write_buf)?,
            _ => {
                // Error responses never carry the mapping
                self.file = None;
                response.write_to(&mut self.write_buf)?
            }
        };
        self.bytes_to_send = self.write_idx + self.file.as_ref().map_or(0, MappedFile::len);
        self.bytes_have_sent = 0;
        Ok(())
    }

    /// Sends as much of the staged response as the socket accepts.
    pub fn write(&mut self) -> WriteOutcome {
        let Some(stream) = self.stream.as_ref() else {
            return WriteOutcome::Failed(io::ErrorKind::NotConnected.into());
        };
        if self.bytes_to_send == 0 {
            return self.finish();
        }
        loop {
            let body = self.file.as_ref().map_or(&[][..], MappedFile::as_bytes);
            let (head, body) =
                pending_segments(&self.write_buf[..self.write_idx], body, self.bytes_have_sent);
            let written = (&*stream).write_vectored(&[IoSlice::new(head), IoSlice::new(body)]);
            match written {
                Ok(0) => {
                    self.file = None;
                    return WriteOutcome::Failed(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => {
                    self.bytes_have_sent += n;
                    if self.bytes_have_sent >= self.bytes_to_send {
                        return self.finish();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return WriteOutcome::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.file = None;
                    return WriteOutcome::Failed(e);
                }
            }
        }
    }

    fn finish(&mut self) -> WriteOutcome {
        self.file = None;
        if self.keep_alive {
            self.reset();
            WriteOutcome::KeepAlive
        } else {
            WriteOutcome::Close
        }
    }
}

/// The unsent parts of the head and body after `sent` bytes went out.
fn pending_segments<'a>(head: &'a [u8], body: &'a [u8], sent: usize) -> (&'a [u8], &'a [u8]) {
    if sent < head.len() {
        (&head[sent..], body)
    } else {
        let offset = (sent - head.len()).min(body.len());
        (&[], &body[offset..])
    }
}
