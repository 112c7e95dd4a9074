//! CRLF line scanning over a partially filled buffer.

/// Outcome of looking for the next line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A complete line ends at `end`; its CRLF occupies `end..end + 2`.
    Ok { end: usize },
    /// No terminator has arrived yet.
    Open,
    /// A bare CR or LF was found at offset `at`.
    Bad { at: usize },
}

/// Scans `buf` from `*checked` for the next CRLF.
///
/// On [`LineStatus::Ok`] the cursor is left just past the terminator. On
/// [`LineStatus::Open`] it is left on the first byte that still needs a look,
/// so a CR that arrived without its LF is examined again once more bytes are
/// in. On [`LineStatus::Bad`] the cursor is not meaningful.
pub fn scan_line(buf: &[u8], checked: &mut usize) -> LineStatus {
    while *checked < buf.len() {
        match buf[*checked] {
            b'\r' => {
                if *checked + 1 == buf.len() {
                    return LineStatus::Open;
                }
                if buf[*checked + 1] == b'\n' {
                    let end = *checked;
                    *checked += 2;
                    return LineStatus::Ok { end };
                }
                return LineStatus::Bad { at: *checked };
            }
            b'\n' => return LineStatus::Bad { at: *checked },
            _ => *checked += 1,
        }
    }
    LineStatus::Open
}
