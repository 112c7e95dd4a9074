//! Static file server built on epoll, a worker pool and an expiry list.
//!
//! The reactor in [`HttpServer`] owns every socket. Request parsing and file
//! lookup run on [`WorkerPool`] threads, and idle connections are evicted by
//! sweeping an [`ExpiryList`] on each timer tick.

mod config;
mod connection;
mod error;
mod file;
mod http_server;
mod poller;
mod pool;
mod response;
mod signal;
mod tests;
mod timer;

// Re-export public items
pub use config::ServerConfig;
pub use connection::{Connection, HttpCode, ProcessOutcome, ReadOutcome, WriteOutcome};
pub use error::Error;
pub use file::{FileStat, MappedFile, resolve_path};
pub use http_server::HttpServer;
pub use poller::{Event, Events, Interest, Poller};
pub use pool::{Process, SubmitError, WorkerPool};
pub use response::{HttpResponse, StatusCode};
pub use signal::{ServerHandle, Signal, SignalChannel, schedule_alarm};
pub use timer::{ExpiryList, Iter, TimerId};
