//! HTTP parser module.
//!
//! The parser is incremental: a connection hands it the filled prefix of its
//! read buffer on every call and the parser resumes from the cursors it kept
//! from the previous call. It never performs I/O and never copies the buffer.

mod request;
mod line;
mod method;
mod version;
mod error;

// Re-export public items
pub use request::{CheckState, HttpRequest, ParseStatus, RequestParser};
pub use line::{LineStatus, scan_line};
pub use method::Method;
pub use version::HttpVersion;
pub use error::Error;

// Re-export the parse_request function
pub use request::parse_request;
