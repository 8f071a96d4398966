//! Line framing for the POP3 wire
//!
//! Reads are bounded to [`MAX_LINE`] octets. Every write is flushed
//! straight away; a session never has more than one response in
//! flight.

use super::hooks::Response;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Longest accepted command line, terminator excluded.
pub const MAX_LINE: usize = 1024;

/// One read from the client.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// A line with its terminator stripped.
    Data(Vec<u8>),
    /// A line over [`MAX_LINE`] octets; its content was discarded.
    TooLong,
    Eof,
}

/// Buffered client stream.
#[derive(Debug)]
pub struct Transport<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one line, discarding anything past [`MAX_LINE`] octets.
    pub async fn read_line(&mut self) -> io::Result<Line> {
        let mut line = Vec::new();
        let mut overflow = false;

        loop {
            let (used, done) = {
                let buf = self.stream.fill_buf().await?;
                if buf.is_empty() {
                    if overflow {
                        return Ok(Line::TooLong);
                    }
                    if line.is_empty() {
                        return Ok(Line::Eof);
                    }
                    break;
                }
                let (used, done) = buf
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or((buf.len(), false), |i| (i + 1, true));
                if !overflow {
                    line.extend_from_slice(&buf[..used]);
                    if line.len() > MAX_LINE + 2 {
                        overflow = true;
                        line.clear();
                    }
                }
                (used, done)
            };
            self.stream.consume(used);
            if done {
                break;
            }
        }

        while matches!(line.last(), Some(b'\r' | b'\n')) {
            line.pop();
        }
        if overflow || line.len() > MAX_LINE {
            return Ok(Line::TooLong);
        }
        Ok(Line::Data(line))
    }

    /// Send a single status line.
    pub async fn push(&mut self, status: &str) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(status.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await
    }

    /// Send a status line, dot-stuffed data lines and the final `.`.
    pub async fn push_multi(&mut self, status: &str, lines: &[Vec<u8>]) -> io::Result<()> {
        let mut out = Vec::with_capacity(status.len() + lines.iter().map(Vec::len).sum::<usize>());
        out.extend_from_slice(status.as_bytes());
        out.extend_from_slice(b"\r\n");
        for line in lines {
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
        debug!("S: {} ({} lines)", status, lines.len());

        let stream = self.stream.get_mut();
        stream.write_all(&out).await?;
        stream.flush().await
    }

    pub async fn send(&mut self, response: &Response) -> io::Result<()> {
        match response {
            Response::Status(status) => {
                debug!("S: {}", status);
                self.push(status).await
            }
            Response::Multi { status, lines } => self.push_multi(status, lines).await,
        }
    }

    /// Close the write half.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.get_mut().shutdown().await
    }
}
