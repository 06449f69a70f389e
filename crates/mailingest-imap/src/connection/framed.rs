//! Line and literal framing.
//!
//! A response is one CRLF-terminated line, extended by any `{n}` literals
//! announced at the end of a line. [`FramedStream::read_response`] returns
//! the whole response, literals included, as one buffer.

#![allow(clippy::missing_errors_doc)]

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Longest line accepted before a literal or CRLF.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Largest literal accepted from the server.
pub const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered, framed IMAP transport.
pub struct FramedStream<S> {
    inner: BufReader<S>,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a transport.
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
        }
    }

    /// Reads one complete response including embedded literals.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();

        loop {
            let line_start = response.len();
            self.read_line_into(&mut response).await?;

            let Some(len) = literal_length(&response[line_start..]) else {
                break;
            };
            if len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }

            let start = response.len();
            response.resize(start + len, 0);
            self.inner.read_exact(&mut response[start..]).await?;
        }

        Ok(response)
    }

    /// Reads responses until the tagged completion for `tag` arrives.
    ///
    /// The tagged line is the last element of the returned list.
    pub async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Vec<u8>>> {
        let mut responses = Vec::new();
        loop {
            let response = self.read_response().await?;
            let done = is_tagged_for(&response, tag);
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    /// Appends one CRLF-terminated line to `out`.
    async fn read_line_into(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len();
        loop {
            let buf = self.inner.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }

            // A CR may end one read and its LF begin the next.
            let pending_cr = out.last() == Some(&b'\r') && buf[0] == b'\n';
            if pending_cr {
                out.push(b'\n');
                self.inner.consume(1);
                return Ok(());
            }

            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                out.extend_from_slice(&buf[..pos + 2]);
                self.inner.consume(pos + 2);
                return Ok(());
            }

            let len = buf.len();
            out.extend_from_slice(buf);
            self.inner.consume(len);

            if out.len() - start > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Writes and flushes a serialized command.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.inner.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Returns true if `response` is the tagged completion for `tag`.
fn is_tagged_for(response: &[u8], tag: &str) -> bool {
    response.starts_with(tag.as_bytes()) && response.get(tag.len()) == Some(&b' ')
}

/// Parses a trailing `{n}` or `{n+}` literal announcement.
fn literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_literal_length() {
        assert_eq!(literal_length(b"* 1 FETCH (BODY[] {42}\r\n"), Some(42));
        assert_eq!(literal_length(b"{7+}\r\n"), Some(7));
        assert_eq!(literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(literal_length(b"* OK done\r\n"), None);
        assert_eq!(literal_length(b"{12}"), None);
        assert_eq!(literal_length(b"{}\r\n"), None);
        assert_eq!(literal_length(b"{x1}\r\n"), None);
    }

    #[test]
    fn test_is_tagged_for() {
        assert!(is_tagged_for(b"A0003 OK done\r\n", "A0003"));
        assert!(!is_tagged_for(b"A00031 OK done\r\n", "A0003"));
        assert!(!is_tagged_for(b"* OK\r\n", "A0003"));
    }

    #[tokio::test]
    async fn test_read_fetch_with_literal_split_across_reads() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (UID 9 BODY[] {11}\r\n")
            .read(b"Subject")
            .read(b": x)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (UID 9 BODY[] {11}\r\nSubject: x)\r\n");
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new().read(b"* OK ready\r").read(b"\n").build();
        let mut framed = FramedStream::new(mock);
        assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
    }

    #[tokio::test]
    async fn test_read_until_tagged_collects_untagged() {
        let mock = Builder::new()
            .read(b"* SEARCH 3 4\r\n")
            .read(b"A0002 OK SEARCH completed\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let responses = framed.read_until_tagged("A0002").await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1], b"A0002 OK SEARCH completed\r\n");
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let mock = Builder::new().read(b"* OK partial").build();
        let mut framed = FramedStream::new(mock);
        assert!(matches!(framed.read_response().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_literal_rejected() {
        let header = format!("* 1 FETCH (BODY[] {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"A0001 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"A0001 NOOP\r\n").await.unwrap();
    }
}
