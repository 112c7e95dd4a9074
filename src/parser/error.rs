//! Error types for the HTTP parser.

use thiserror::Error;

use crate::parser::method::Method;

/// Errors that can occur during HTTP request parsing.
///
/// Every variant except [`Error::Incomplete`] is terminal for the request and
/// is answered with `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The method token is not a known HTTP method.
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// The method is known but the server only serves GET.
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(Method),

    /// The request target does not resolve to an absolute path.
    #[error("Invalid HTTP path: {0}")]
    InvalidPath(String),

    /// The request line is malformed (wrong format or missing components).
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    /// The HTTP version in the request is not supported.
    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    /// The Content-Length header is not a non-negative integer.
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// A bare CR or LF appeared without its pair.
    #[error("Malformed line terminator at byte {0}")]
    MalformedLine(usize),

    /// The input ended before the request was complete.
    #[error("Incomplete request")]
    Incomplete,
}
