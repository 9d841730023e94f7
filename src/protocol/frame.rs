//! RESP Frame Reader
//!
//! Reads one client command at a time from a buffered byte stream. Two
//! framings share the stream, dispatched on the first byte of a line:
//!
//! - **Multi-bulk**: `*<N>\r\n` followed by N bulk strings, each
//!   `$<len>\r\n<len bytes>\r\n`. This is what real clients send.
//! - **Inline**: any other line, split on whitespace. This is what a human
//!   with `nc` sends.
//!
//! End of stream yields `Ok(None)`. So does a malformed header (a count or
//! length that does not parse, or a missing `$` where one is expected):
//! the reader is deliberately lenient and treats garbage framing like a
//! disconnect rather than trying to resynchronize.

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Reads the next command from `reader`.
///
/// Returns the decoded arguments in order, `Ok(None)` on end of stream or
/// unrecoverable framing, or an I/O error if the transport fails mid-frame.
pub async fn read_command<R>(reader: &mut R) -> io::Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(line) = read_line(reader).await? else {
        return Ok(None);
    };

    let Some(count) = line.strip_prefix('*') else {
        // Inline command: the line itself is the argument list.
        return Ok(Some(line.split_whitespace().map(str::to_string).collect()));
    };

    let Ok(count) = count.parse::<usize>() else {
        return Ok(None);
    };

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(header) = read_line(reader).await? else {
            return Ok(None);
        };
        let Some(len) = header.strip_prefix('$') else {
            return Ok(None);
        };
        let Ok(len) = len.parse::<usize>() else {
            return Ok(None);
        };

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        // Discard the CRLF trailing the payload.
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;

        args.push(String::from_utf8_lossy(&payload).into_owned());
    }

    Ok(Some(args))
}

/// Reads a single line and strips the CRLF. `None` on end of stream.
async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}
