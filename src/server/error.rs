//! Error types for the HTTP server.

use thiserror::Error;

/// Errors that can occur while constructing or running the server.
///
/// Per-request failures never surface here: the connection turns them into
/// a status code or a teardown. These are the errors that stop startup or
/// the reactor itself.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A configuration value is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be built.
    #[error("Worker pool error: {0}")]
    PoolError(String),

    /// A response head did not fit in the connection's write buffer.
    #[error("Response does not fit in a {0}-byte write buffer")]
    WriteBufferFull(usize),

    /// JSON configuration could not be read.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
