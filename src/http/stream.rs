//! Framed reads over a raw byte stream.
//!
//! The parser never touches the socket directly: it consumes delimited
//! slices ([`read_until`](MessageReader::read_until)) and fixed-size
//! slices ([`read_exact`](MessageReader::read_exact)) from a buffered
//! reader, and must not assume contiguous byte arrival — a delimiter may
//! straddle two reads.

use crate::errors::ErrorKind;
use memchr::memmem;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

pub(crate) struct MessageReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    #[inline]
    pub(crate) fn new(stream: R, capacity: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity, stream),
        }
    }

    /// Waits until at least one byte is buffered, without consuming it.
    ///
    /// Returns `false` on clean end of stream. The connection driver races
    /// this against the idle deadline to tell "peer went away quietly"
    /// apart from "request stalled halfway".
    pub(crate) async fn poll_ready(&mut self) -> Result<bool, ErrorKind> {
        let buffered = self.inner.fill_buf().await?;
        Ok(!buffered.is_empty())
    }

    /// Reads bytes up to and including `delim`.
    ///
    /// Fails with [`ErrorKind::ConnectionClosed`] if the stream ends first
    /// and with [`ErrorKind::LineTooLong`] once more than `limit` bytes
    /// have accumulated without the delimiter.
    pub(crate) async fn read_until(
        &mut self,
        delim: &[u8],
        limit: usize,
    ) -> Result<Vec<u8>, ErrorKind> {
        debug_assert!(!delim.is_empty());

        let finder = memmem::Finder::new(delim);
        let mut out: Vec<u8> = Vec::new();

        loop {
            let chunk = self.inner.fill_buf().await?;
            if chunk.is_empty() {
                return Err(ErrorKind::ConnectionClosed);
            }

            // A delimiter may straddle the boundary between the bytes
            // already taken and this chunk. The seam window holds the
            // largest possible straddle on each side.
            let seam = out.len().min(delim.len() - 1);
            if seam > 0 {
                let mut window = Vec::with_capacity(seam + delim.len() - 1);
                window.extend_from_slice(&out[out.len() - seam..]);
                window.extend_from_slice(&chunk[..chunk.len().min(delim.len() - 1)]);

                if let Some(pos) = finder.find(&window) {
                    let from_chunk = pos + delim.len() - seam;
                    out.truncate(out.len() - seam + pos);
                    out.extend_from_slice(delim);
                    self.inner.consume(from_chunk);
                    return Self::check_line(out, limit);
                }
            }

            match finder.find(chunk) {
                Some(pos) => {
                    let taken = pos + delim.len();
                    out.extend_from_slice(&chunk[..taken]);
                    self.inner.consume(taken);
                    return Self::check_line(out, limit);
                }
                None => {
                    let taken = chunk.len();
                    out.extend_from_slice(chunk);
                    self.inner.consume(taken);
                    if out.len() > limit {
                        return Err(ErrorKind::LineTooLong);
                    }
                }
            }
        }
    }

    /// Reads exactly `n` bytes, or fails with
    /// [`ErrorKind::ConnectionClosed`] if the stream ends first.
    pub(crate) async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ErrorKind> {
        let mut buf = vec![0; n];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }

    #[inline]
    fn check_line(out: Vec<u8>, limit: usize) -> Result<Vec<u8>, ErrorKind> {
        match out.len() > limit {
            true => Err(ErrorKind::LineTooLong),
            false => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(input: &[u8]) -> MessageReader<Cursor<Vec<u8>>> {
        MessageReader::new(Cursor::new(input.to_vec()), 64 * 1024)
    }

    #[tokio::test]
    async fn read_until_includes_delimiter() {
        let mut r = reader(b"GET / HTTP/1.1\r\nHost: x\r\n");

        let line = r.read_until(b"\r\n", 1024).await.unwrap();
        assert_eq!(line, b"GET / HTTP/1.1\r\n");

        let line = r.read_until(b"\r\n", 1024).await.unwrap();
        assert_eq!(line, b"Host: x\r\n");
    }

    #[tokio::test]
    async fn read_until_multi_byte_delimiter() {
        let mut r = reader(b"a: 1\r\nb: 2\r\n\r\ntrailing");

        let block = r.read_until(b"\r\n\r\n", 1024).await.unwrap();
        assert_eq!(block, b"a: 1\r\nb: 2\r\n\r\n");

        let rest = r.read_exact(8).await.unwrap();
        assert_eq!(rest, b"trailing");
    }

    #[tokio::test]
    async fn read_until_delimiter_straddles_reads() {
        // A 4-byte buffer forces the terminator to arrive split across
        // several fill_buf calls.
        let input = b"header: value\r\n\r\nbody".to_vec();
        let mut r = MessageReader::new(Cursor::new(input), 4);

        let block = r.read_until(b"\r\n\r\n", 1024).await.unwrap();
        assert_eq!(block, b"header: value\r\n\r\n");

        let rest = r.read_exact(4).await.unwrap();
        assert_eq!(rest, b"body");
    }

    #[tokio::test]
    async fn read_until_eof() {
        let mut r = reader(b"no terminator here");
        assert_eq!(
            r.read_until(b"\r\n", 1024).await,
            Err(ErrorKind::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn read_until_line_limit() {
        let mut r = reader(&[b'x'; 200]);
        assert_eq!(r.read_until(b"\r\n", 100).await, Err(ErrorKind::LineTooLong));

        // Limit counts the delimiter too.
        let mut r = reader(b"abcdef\r\n");
        assert_eq!(r.read_until(b"\r\n", 7).await, Err(ErrorKind::LineTooLong));
        let mut r = reader(b"abcdef\r\n");
        assert_eq!(r.read_until(b"\r\n", 8).await.unwrap(), b"abcdef\r\n");
    }

    #[tokio::test]
    async fn read_exact_short_stream() {
        let mut r = reader(b"abc");
        assert_eq!(r.read_exact(3).await.unwrap(), b"abc");

        let mut r = reader(b"ab");
        assert_eq!(r.read_exact(3).await, Err(ErrorKind::ConnectionClosed));
    }

    #[tokio::test]
    async fn poll_ready_reports_data_and_eof() {
        let mut r = reader(b"x");
        assert_eq!(r.poll_ready().await, Ok(true));
        // Not consumed by the poll.
        assert_eq!(r.read_exact(1).await.unwrap(), b"x");
        assert_eq!(r.poll_ready().await, Ok(false));
    }
}
