//! A minimal static file HTTP server.
//!
//! One thread multiplexes every client socket over epoll. Complete requests
//! are parsed and resolved against a document root on a bounded worker pool,
//! files are memory-mapped and sent with vectored writes, and connections
//! that stay silent too long are evicted by a periodic sweep of a sorted
//! expiry list.
//!
//! # Features
//!
//! - Incremental request parsing that resumes across partial reads
//! - `GET` of regular files with `200`, `400`, `403`, `404` and `500` responses
//! - `Connection: keep-alive` support
//! - Fixed connection and work queue limits
//! - Graceful shutdown on `SIGTERM`
//!
//! # Examples
//!
//! ## Parsing a request
//!
//! ```
//! use microstatic::{Method, parse_request};
//!
//! let request = parse_request(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
//! assert_eq!(request.method, Method::GET);
//! assert_eq!(request.path, "/index.html");
//! assert!(!request.keep_alive);
//! ```
//!
//! ## Feeding a request in pieces
//!
//! ```
//! use microstatic::parser::{ParseStatus, RequestParser};
//!
//! let raw = b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
//! let mut parser = RequestParser::new();
//! assert_eq!(parser.parse(&raw[..10]).unwrap(), ParseStatus::Incomplete);
//! assert_eq!(parser.parse(raw).unwrap(), ParseStatus::Complete);
//! assert!(parser.keep_alive());
//! ```
//!
//! ## Running a server
//!
//! ```no_run
//! use microstatic::{HttpServer, ServerConfig};
//!
//! let config = ServerConfig {
//!     addr: "127.0.0.1:8080".parse().unwrap(),
//!     doc_root: "./resources".into(),
//!     ..ServerConfig::default()
//! };
//! HttpServer::new(config)?.start()?;
//! # Ok::<(), microstatic::ServerError>(())
//! ```

// Export the parser module
pub mod parser;

// Export the server module
pub mod server;

// Re-export commonly used items for convenience
pub use parser::{Error as ParserError, HttpRequest, HttpVersion, Method, parse_request};
pub use server::{
    Error as ServerError, HttpResponse, HttpServer, ServerConfig, ServerHandle, StatusCode,
};
