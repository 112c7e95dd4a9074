//! HTTP server implementation.
//!
//! One thread runs the reactor: it accepts connections, reads requests into
//! per-connection buffers, writes staged responses and evicts idle
//! connections. Parsing and file resolution run on the worker pool. A
//! connection is handed to a worker by moving it into a work item, and it
//! comes back over a channel when the worker is done, so no connection is
//! ever shared between threads.

use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;

use log::{debug, error, info, trace, warn};

use crate::server::config::ServerConfig;
use crate::server::connection::{Connection, ProcessOutcome, ReadOutcome, WriteOutcome};
use crate::server::error::Error;
use crate::server::poller::{Event, Events, Interest, Poller};
use crate::server::pool::{Process, WorkerPool};
use crate::server::signal::{ServerHandle, Signal, SignalChannel, WakePipe, notify, schedule_alarm};
use crate::server::timer::ExpiryList;

const LISTENER: u64 = u64::MAX;
const SIGNALS: u64 = u64::MAX - 1;
const COMPLETIONS: u64 = u64::MAX - 2;

/// A connection travelling through the worker pool.
struct WorkItem {
    token: usize,
    conn: Box<Connection>,
}

impl Process for WorkItem {
    type Output = ProcessOutcome;

    fn process(&mut self) -> ProcessOutcome {
        self.conn.process()
    }
}

/// Who holds the connection behind a token.
enum Slot {
    /// Not bound to a socket; the buffers are kept for reuse.
    Free(Box<Connection>),
    /// Open and owned by the reactor.
    Idle(Box<Connection>),
    /// Owned by a worker. `evicted` is set when the expiry sweep fires while
    /// the worker holds it.
    InFlight { evicted: bool },
}

/// State the reactor shares across its handlers.
struct ServerContext {
    poller: Poller,
    user_count: usize,
    max_connections: usize,
    doc_root: Arc<Path>,
}

/// An HTTP server serving static files from a document root.
pub struct HttpServer {
    config: ServerConfig,
    listener: TcpListener,
    context: ServerContext,
    signals: SignalChannel,
    completions: WakePipe,
    done_rx: Receiver<(WorkItem, ProcessOutcome)>,
    pool: WorkerPool<WorkItem>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    timers: ExpiryList<usize>,
}

impl HttpServer {
    /// Binds the listener and starts the worker threads.
    ///
    /// Signal handlers are only installed once [`HttpServer::start`] runs.
    pub fn new(config: ServerConfig) -> Result<Self, Error> {
        config.validate()?;
        if !config.doc_root.is_dir() {
            warn!("Document root {} is not a directory", config.doc_root.display());
        }

        let listener = TcpListener::bind(config.addr)?;
        listener.set_nonblocking(true)?;

        let poller = Poller::new()?;
        poller.add(listener.as_raw_fd(), LISTENER, Interest::Readable, false)?;

        let signals = SignalChannel::new()?;
        poller.add(signals.raw_fd(), SIGNALS, Interest::Readable, false)?;

        let completions = WakePipe::new()?;
        poller.add(completions.reader_fd(), COMPLETIONS, Interest::Readable, false)?;

        let (done_tx, done_rx) = mpsc::channel();
        let waker = completions.writer();
        let pool = WorkerPool::new(
            config.worker_threads,
            config.max_requests,
            move |item: WorkItem, outcome: ProcessOutcome| {
                if done_tx.send((item, outcome)).is_err() {
                    // The reactor is gone; dropping the item closes the socket
                    return;
                }
                if let Err(e) = notify(&waker, 1) {
                    error!("Failed to wake the reactor: {e}");
                }
            },
        )?;

        let context = ServerContext {
            poller,
            user_count: 0,
            max_connections: config.max_connections,
            doc_root: Arc::from(config.doc_root.as_path()),
        };

        Ok(Self {
            config,
            listener,
            context,
            signals,
            completions,
            done_rx,
            pool,
            slots: Vec::new(),
            free: Vec::new(),
            timers: ExpiryList::new(),
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle that can stop the server or trigger a sweep from any thread.
    pub fn handle(&self) -> ServerHandle {
        self.signals.handle()
    }

    /// Display the server configuration.
    fn display_server_info(&self) {
        let addr = self
            .local_addr()
            .map_or_else(|_| self.config.addr.to_string(), |a| a.to_string());
        info!("Server listening on http://{addr}");
        info!("Serving files from {}", self.context.doc_root.display());
        info!(
            "{} workers, queue of {}, up to {} connections, idle timeout {:?}",
            self.pool.threads(),
            self.pool.capacity(),
            self.context.max_connections,
            self.config.idle_timeout(),
        );
    }

    /// Runs the event loop until a terminate signal arrives.
    pub fn start(mut self) -> Result<(), Error> {
        self.display_server_info();
        if self.config.handle_signals {
            self.signals.install()?;
            schedule_alarm(self.config.timeslot());
        }

        let mut events = Events::with_capacity(self.config.max_events);
        let mut stop = false;
        while !stop {
            if let Err(e) = self.context.poller.wait(&mut events, None) {
                error!("Polling failed: {e}");
                self.shutdown();
                return Err(e.into());
            }

            // Sweeps wait until the whole batch is handled
            let mut timeout = false;
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    SIGNALS => match self.signals.drain() {
                        Ok(signals) => {
                            for signal in signals {
                                match signal {
                                    Signal::Alarm => timeout = true,
                                    Signal::Terminate => stop = true,
                                }
                            }
                        }
                        Err(e) => {
                            error!("Reading signals failed: {e}");
                            self.shutdown();
                            return Err(e.into());
                        }
                    },
                    COMPLETIONS => {
                        if let Err(e) = self.collect_completions() {
                            error!("Collecting completions failed: {e}");
                            self.shutdown();
                            return Err(e);
                        }
                    }
                    token => self.handle_client(token as usize, event),
                }
            }

            if timeout {
                self.sweep(Instant::now());
                if self.config.handle_signals {
                    schedule_alarm(self.config.timeslot());
                }
            }
        }

        info!("Received shutdown request");
        self.shutdown();
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.register(stream, peer),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Error accepting connection: {e}");
                    break;
                }
            }
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.context.user_count >= self.context.max_connections {
            warn!("Connection limit reached, rejecting connection from {peer}");
            return;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("Failed to make connection from {peer} non-blocking: {e}");
            return;
        }

        let fd = stream.as_raw_fd();
        let (token, mut conn) = self.allocate_slot();
        conn.init(stream, peer);
        if let Err(e) = self
            .context
            .poller
            .add(fd, token as u64, Interest::Readable, true)
        {
            warn!("Failed to register connection from {peer}: {e}");
            conn.close();
            self.slots[token] = Slot::Free(conn);
            self.free.push(token);
            return;
        }

        conn.timer = Some(self.timers.attach(token, self.config.idle_timeout()));
        self.slots[token] = Slot::Idle(conn);
        self.context.user_count += 1;
        debug!(
            "Accepted connection {token} from {peer} ({} open)",
            self.context.user_count
        );
    }

    /// Takes a free slot's connection, or allocates a new slot.
    fn allocate_slot(&mut self) -> (usize, Box<Connection>) {
        while let Some(token) = self.free.pop() {
            match mem::replace(&mut self.slots[token], Slot::InFlight { evicted: false }) {
                Slot::Free(conn) => return (token, conn),
                other => self.slots[token] = other,
            }
        }
        let conn = Box::new(Connection::new(
            Arc::clone(&self.context.doc_root),
            self.config.read_buffer_size,
            self.config.write_buffer_size,
        ));
        self.slots.push(Slot::InFlight { evicted: false });
        (self.slots.len() - 1, conn)
    }

    fn handle_client(&mut self, token: usize, event: Event) {
        let Some(Slot::Idle(conn)) = self.slots.get_mut(token) else {
            trace!("Ignoring event for connection {token}, not held by the reactor");
            return;
        };

        if event.is_closed() {
            debug!("Connection {token} hung up");
            self.release(token);
        } else if event.is_readable() {
            match conn.read() {
                ReadOutcome::Ready => {
                    if let Some(id) = conn.timer {
                        self.timers.refresh(id, self.config.idle_timeout());
                    }
                    self.dispatch(token);
                }
                ReadOutcome::PeerClosed => self.release(token),
                ReadOutcome::BufferFull => {
                    debug!("Request on connection {token} does not fit in the read buffer");
                    self.release(token);
                }
                ReadOutcome::Failed(e) => {
                    debug!("Read on connection {token} failed: {e}");
                    self.release(token);
                }
            }
        } else if event.is_writable() {
            match conn.write() {
                WriteOutcome::WouldBlock => self.rearm(token, Interest::Writable),
                WriteOutcome::KeepAlive => self.rearm(token, Interest::Readable),
                WriteOutcome::Close => self.release(token),
                WriteOutcome::Failed(e) => {
                    debug!("Write on connection {token} failed: {e}");
                    self.release(token);
                }
            }
        }
    }

    /// Moves a connection into the work queue.
    fn dispatch(&mut self, token: usize) {
        let conn = match mem::replace(&mut self.slots[token], Slot::InFlight { evicted: false }) {
            Slot::Idle(conn) => conn,
            other => {
                self.slots[token] = other;
                return;
            }
        };
        if let Err(e) = self.pool.submit(WorkItem { token, conn }) {
            warn!("Closing connection {token}: {e}");
            self.slots[token] = Slot::Idle(e.into_inner().conn);
            self.release(token);
        }
    }

    fn collect_completions(&mut self) -> Result<(), Error> {
        self.completions.drain()?;
        while let Ok((item, outcome)) = self.done_rx.try_recv() {
            self.complete(item, outcome);
        }
        Ok(())
    }

    /// Takes a connection back from a worker and re-arms it.
    fn complete(&mut self, item: WorkItem, outcome: ProcessOutcome) {
        let WorkItem { token, conn } = item;
        let evicted = matches!(self.slots.get(token), Some(Slot::InFlight { evicted: true }));
        self.slots[token] = Slot::Idle(conn);
        if evicted {
            info!("Connection {token} timed out while being processed");
            self.release(token);
            return;
        }

        match outcome {
            ProcessOutcome::Incomplete => self.rearm(token, Interest::Readable),
            ProcessOutcome::Respond(status) => {
                trace!("Connection {token} responding with {}", status.code());
                self.rearm(token, Interest::Writable);
            }
            ProcessOutcome::Failed(e) => {
                warn!("Failed to build response on connection {token}: {e}");
                self.release(token);
            }
        }
    }

    fn rearm(&mut self, token: usize, interest: Interest) {
        let Some(Slot::Idle(conn)) = self.slots.get(token) else {
            return;
        };
        let Some(fd) = conn.raw_fd() else {
            return;
        };
        if let Err(e) = self.context.poller.rearm(fd, token as u64, interest) {
            warn!("Failed to re-arm connection {token}: {e}");
            self.release(token);
        }
    }

    /// Evicts every connection whose idle deadline has passed.
    fn sweep(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.timers.sweep(now, |token| expired.push(token));
        for token in expired {
            match self.slots.get_mut(token) {
                Some(Slot::Idle(conn)) => {
                    conn.timer = None;
                    info!("Closing idle connection {token}");
                    self.release(token);
                }
                Some(Slot::InFlight { evicted }) => *evicted = true,
                _ => {}
            }
        }
        if let Some(next) = self.timers.next_deadline() {
            trace!("Next expiry in {:?}", next.saturating_duration_since(now));
        }
    }

    /// Closes an open connection and returns its slot to the free list.
    fn release(&mut self, token: usize) {
        let Some(slot) = self.slots.get_mut(token) else {
            return;
        };
        let mut conn = match mem::replace(slot, Slot::InFlight { evicted: false }) {
            Slot::Idle(conn) => conn,
            other => {
                *slot = other;
                return;
            }
        };

        if let Some(id) = conn.timer.take() {
            self.timers.remove(id);
        }
        if let Some(fd) = conn.raw_fd() {
            if let Err(e) = self.context.poller.delete(fd) {
                warn!("Failed to deregister connection {token}: {e}");
            }
        }
        if conn.close() {
            self.context.user_count -= 1;
        }
        self.slots[token] = Slot::Free(conn);
        self.free.push(token);
    }

    /// Perform graceful shutdown.
    fn shutdown(&mut self) {
        info!("Shutting down, {} connections open", self.context.user_count);

        for item in self.pool.shutdown() {
            self.slots[item.token] = Slot::Idle(item.conn);
            self.release(item.token);
        }
        while let Ok((item, _)) = self.done_rx.try_recv() {
            self.slots[item.token] = Slot::Idle(item.conn);
            self.release(item.token);
        }
        for token in 0..self.slots.len() {
            self.release(token);
        }

        info!("Server shutdown complete");
    }
}
