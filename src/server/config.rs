//! Server configuration.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::server::error::Error;

/// HTTP server configuration.
///
/// Every field has a default, so a JSON file only needs to name the values
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address to bind to.
    pub addr: SocketAddr,
    /// Directory that request paths are appended to.
    pub doc_root: PathBuf,
    /// Number of worker threads parsing requests and building responses.
    pub worker_threads: usize,
    /// Maximum number of connections waiting in the work queue.
    pub max_requests: usize,
    /// Maximum number of simultaneously open client connections.
    pub max_connections: usize,
    /// Maximum number of readiness events handled per poll.
    pub max_events: usize,
    /// Per-connection read buffer size; a request must fit in it.
    pub read_buffer_size: usize,
    /// Per-connection buffer for the status line, headers and error bodies.
    pub write_buffer_size: usize,
    /// Interval between expiry sweeps, in seconds.
    pub timeslot_secs: u64,
    /// Idle timeout expressed in sweep intervals.
    pub idle_timeslots: u32,
    /// Install SIGALRM/SIGTERM handlers and drive sweeps with `alarm(2)`.
    ///
    /// Embedders running several servers in one process turn this off and
    /// use a [`ServerHandle`](crate::server::ServerHandle) instead.
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            doc_root: PathBuf::from("./resources"),
            worker_threads: 8,
            max_requests: 10_000,
            max_connections: 65_535,
            max_events: 1024,
            read_buffer_size: 2048,
            write_buffer_size: 1024,
            timeslot_secs: 5,
            idle_timeslots: 3,
            handle_signals: true,
        }
    }
}

impl ServerConfig {
    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn timeslot(&self) -> Duration {
        Duration::from_secs(self.timeslot_secs)
    }

    /// How long a connection may stay silent before the sweep evicts it.
    pub fn idle_timeout(&self) -> Duration {
        self.timeslot() * self.idle_timeslots
    }

    /// Rejects values the server cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        let checks = [
            (self.worker_threads, "worker_threads"),
            (self.max_requests, "max_requests"),
            (self.max_connections, "max_connections"),
            (self.max_events, "max_events"),
            (self.read_buffer_size, "read_buffer_size"),
            (self.write_buffer_size, "write_buffer_size"),
        ];
        if let Some((_, name)) = checks.iter().find(|(value, _)| *value == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be greater than zero")));
        }
        if self.timeslot_secs == 0 || self.idle_timeslots == 0 {
            return Err(Error::InvalidConfig(
                "timeslot_secs and idle_timeslots must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
