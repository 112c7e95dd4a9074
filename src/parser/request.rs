//! Incremental HTTP request parsing.

use std::str::FromStr;

use crate::parser::error::Error;
use crate::parser::line::{LineStatus, scan_line};
use crate::parser::method::Method;
use crate::parser::version::HttpVersion;

/// Major state of the request parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckState {
    /// Waiting for `METHOD TARGET VERSION`.
    #[default]
    RequestLine,
    /// Reading header lines until the blank line.
    Headers,
    /// Waiting for `Content-Length` body bytes to arrive.
    Body,
}

/// Result of one [`RequestParser::parse`] call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are needed; all cursors are preserved.
    Incomplete,
    /// The request line, headers and declared body have all arrived.
    Complete,
}

/// A fully parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// The HTTP method (always GET for an accepted request)
    pub method: Method,
    /// The request path with any `http://host` prefix removed
    pub path: String,
    /// The HTTP version
    pub version: HttpVersion,
    /// The `Host` header, verbatim
    pub host: Option<String>,
    /// The declared body length
    pub content_length: usize,
    /// Whether the client sent `Connection: keep-alive`
    pub keep_alive: bool,
}

/// Resumable request parser.
///
/// `parse` is called with the whole filled prefix of a connection's read
/// buffer each time new bytes arrive. `checked` is the parse cursor (bytes
/// already scanned) and `line_start` marks the beginning of the line being
/// assembled; both only move forward until [`RequestParser::reset`].
#[derive(Debug, Clone, Default)]
pub struct RequestParser {
    state: CheckState,
    checked: usize,
    line_start: usize,
    method: Option<Method>,
    path: Option<String>,
    version: Option<HttpVersion>,
    host: Option<String>,
    content_length: usize,
    keep_alive: bool,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the parser to its freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    /// Bytes of the buffer already scanned.
    pub fn checked(&self) -> usize {
        self.checked
    }

    /// Offset of the line currently being assembled.
    pub fn line_start(&self) -> usize {
        self.line_start
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The parsed request, once the request line has been accepted.
    ///
    /// Header fields reflect whatever has been seen so far; callers normally
    /// ask only after [`ParseStatus::Complete`].
    pub fn request(&self) -> Option<HttpRequest> {
        Some(HttpRequest {
            method: self.method?,
            path: self.path.clone()?,
            version: self.version?,
            host: self.host.clone(),
            content_length: self.content_length,
            keep_alive: self.keep_alive,
        })
    }

    /// Advances the parser over `filled`, the entire filled prefix of the
    /// read buffer.
    ///
    /// `filled` must extend the slice passed to the previous call; bytes
    /// before the parse cursor are never looked at again.
    pub fn parse(&mut self, filled: &[u8]) -> Result<ParseStatus, Error> {
        loop {
            match self.state {
                CheckState::RequestLine => {
                    let Some(line) = self.next_line(filled)? else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    self.parse_request_line(line)?;
                    self.state = CheckState::Headers;
                }
                CheckState::Headers => {
                    let Some(line) = self.next_line(filled)? else {
                        return Ok(ParseStatus::Incomplete);
                    };
                    if line.is_empty() {
                        if self.content_length == 0 {
                            return Ok(ParseStatus::Complete);
                        }
                        self.state = CheckState::Body;
                    } else {
                        self.parse_header(line)?;
                    }
                }
                // The body is never interpreted, only waited for
                CheckState::Body => {
                    let buffered = filled.len().saturating_sub(self.checked);
                    return Ok(if buffered >= self.content_length {
                        ParseStatus::Complete
                    } else {
                        ParseStatus::Incomplete
                    });
                }
            }
        }
    }

    fn next_line<'b>(&mut self, filled: &'b [u8]) -> Result<Option<&'b [u8]>, Error> {
        match scan_line(filled, &mut self.checked) {
            LineStatus::Ok { end } => {
                let line = &filled[self.line_start..end];
                self.line_start = self.checked;
                Ok(Some(line))
            }
            LineStatus::Open => Ok(None),
            LineStatus::Bad { at } => Err(Error::MalformedLine(at)),
        }
    }

    fn parse_request_line(&mut self, line: &[u8]) -> Result<(), Error> {
        let text = std::str::from_utf8(line)
            .map_err(|_| Error::MalformedRequestLine(String::from_utf8_lossy(line).into_owned()))?;

        let mut parts = text.split_ascii_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::MalformedRequestLine(text.to_string()));
        };

        let method = Method::from_str(method)?;
        if !method.is_served() {
            return Err(Error::UnsupportedMethod(method));
        }
        let version = HttpVersion::from_str(version)?;
        let path = strip_origin(target).ok_or_else(|| Error::InvalidPath(target.to_string()))?;

        self.method = Some(method);
        self.version = Some(version);
        self.path = Some(path.to_string());
        Ok(())
    }

    fn parse_header(&mut self, line: &[u8]) -> Result<(), Error> {
        // Lines without a colon are ignored like any other unknown header
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            return Ok(());
        };
        let name = line[..colon].trim_ascii();
        let value = line[colon + 1..].trim_ascii();

        if name.eq_ignore_ascii_case(b"Connection") {
            if value.eq_ignore_ascii_case(b"keep-alive") {
                self.keep_alive = true;
            }
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            self.content_length = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or_else(|| {
                    Error::InvalidContentLength(String::from_utf8_lossy(value).into_owned())
                })?;
        } else if name.eq_ignore_ascii_case(b"Host") {
            self.host = Some(String::from_utf8_lossy(value).into_owned());
        }
        Ok(())
    }
}

/// Reduces an absolute-form target (`http://host/path`) to its path.
fn strip_origin(target: &str) -> Option<&str> {
    let path = match target.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => {
            let authority_and_path = &target[7..];
            &authority_and_path[authority_and_path.find('/')?..]
        }
        _ => target,
    };
    path.starts_with('/').then_some(path)
}

/// Parse a complete HTTP request from a byte slice.
///
/// This is a one-shot wrapper around [`RequestParser`]: input that stops
/// short of a full request yields [`Error::Incomplete`].
pub fn parse_request(input: &[u8]) -> Result<HttpRequest, Error> {
    let mut parser = RequestParser::new();
    match parser.parse(input)? {
        ParseStatus::Complete => parser.request().ok_or(Error::Incomplete),
        ParseStatus::Incomplete => Err(Error::Incomplete),
    }
}
