//! HTTP response heads and canned error bodies.

use std::io::{Cursor, Write};

use crate::server::error::Error;

/// Status codes this server produces, with their reason phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    InternalServerError = 500,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }

    /// The canned body sent with an error status. Empty for `200 OK`, whose
    /// body is the requested file.
    pub fn form(&self) -> &'static str {
        match self {
            StatusCode::Ok => "",
            StatusCode::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            StatusCode::Forbidden => "You do not have permission to get file from this server.\n",
            StatusCode::NotFound => "The requested file was not found on this server.\n",
            StatusCode::InternalServerError => {
                "There was an unusual problem serving the requested file.\n"
            }
        }
    }
}

/// The part of a response that is assembled in a connection's write buffer.
///
/// A `200` body is never copied: it goes out as the second segment of a
/// vectored write straight from the file mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code
    pub status: StatusCode,
    /// Value of the `Content-Length` header
    pub content_length: usize,
    /// Selects `Connection: keep-alive` over `Connection: close`
    pub keep_alive: bool,
}

impl HttpResponse {
    /// An error response carrying the status's canned body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_length: status.form().len(),
            keep_alive: false,
        }
    }

    /// A `200 OK` head for a file body of `len` bytes.
    pub fn file(len: usize) -> Self {
        Self {
            status: StatusCode::Ok,
            content_length: len,
            keep_alive: false,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Writes the status line and headers into `buf`, returning the number
    /// of bytes used.
    pub fn write_head(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let capacity = buf.len();
        let mut cursor = Cursor::new(buf);
        write!(
            cursor,
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: text/html\r\nConnection: {}\r\n\r\n",
            self.status.code(),
            self.status.reason_phrase(),
            self.content_length,
            if self.keep_alive { "keep-alive" } else { "close" },
        )
        .map_err(|_| Error::WriteBufferFull(capacity))?;
        Ok(cursor.position() as usize)
    }

    /// Writes the head followed by the canned body, if the status has one.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let head = self.write_head(buf)?;
        let form = self.status.form().as_bytes();
        let end = head + form.len();
        if end > buf.len() {
            return Err(Error::WriteBufferFull(buf.len()));
        }
        buf[head..end].copy_from_slice(form);
        Ok(end)
    }
}
