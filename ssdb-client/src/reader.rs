//! # Socket Buffer
//!
//! Purpose: Incrementally buffer bytes from a socket and hand out protocol
//! lines and fixed-length payloads.
//!
//! ## Design Principles
//! 1. **Two Cursors**: `buf.len()` is bytes written from the socket, `read`
//!    is bytes consumed by the parser.
//! 2. **Purge On Drain**: Once every buffered byte has been consumed the
//!    buffer is reset, so a long-lived connection does not grow forever.
//! 3. **Pull On Demand**: The socket is read only when the buffered bytes
//!    cannot satisfy the request.
//!
//! ```text
//!  0            read                 buf.len()            capacity
//!  |  consumed   |   buffered, unread   |   spare capacity   |
//! ```

use std::io::{Read, Write};

use ssdb_common::{payload_span, FrameSource, LF};
use tracing::trace;

use crate::error::{Error, Result};

/// Message used when a zero-length read reports an orderly remote close.
pub const SERVER_CLOSED_CONNECTION: &str = "Connection closed by server.";

/// Growable read buffer over a socket-like stream.
pub struct SocketBuffer<S> {
    stream: S,
    buf: Vec<u8>,
    read: usize,
    read_size: usize,
}

impl<S: Read> SocketBuffer<S> {
    pub fn new(stream: S, read_size: usize) -> Self {
        SocketBuffer {
            stream,
            buf: Vec::with_capacity(read_size),
            read: 0,
            read_size: read_size.max(1),
        }
    }

    /// Buffered bytes not consumed yet.
    pub fn len(&self) -> usize {
        self.buf.len() - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Drops every buffered byte and rewinds both cursors.
    pub fn purge(&mut self) {
        self.buf.clear();
        self.read = 0;
    }

    /// Reads one line and returns it without the terminator.
    pub fn read_line(&mut self) -> Result<&[u8]> {
        self.purge_if_drained();
        let mut scanned = 0;
        let end = loop {
            if let Some(idx) = memchr::memchr(LF, &self.buf[self.read + scanned..]) {
                break self.read + scanned + idx;
            }
            scanned = self.len();
            self.fill(None)?;
        };
        let start = self.read;
        self.read = end + 1;
        Ok(&self.buf[start..end])
    }

    /// Reads exactly `len` bytes plus the mandatory trailing terminator.
    ///
    /// A close before `len` bytes arrive is a framing error: the server
    /// announced more data than it delivered.
    pub fn read_exact(&mut self, len: usize) -> Result<&[u8]> {
        self.purge_if_drained();
        let needed = payload_span(len)?;
        if self.len() < needed {
            match self.fill(Some(needed - self.len())) {
                Err(Error::Connection(_)) if self.len() < needed => {
                    return Err(Error::Framing(format!(
                        "expected {} payload bytes, stream closed after {}",
                        len,
                        self.len()
                    )));
                }
                other => other?,
            }
        }
        let start = self.read;
        if self.buf[start + len] != LF {
            return Err(Error::Framing("missing payload terminator".to_string()));
        }
        self.read = start + needed;
        Ok(&self.buf[start..start + len])
    }

    fn purge_if_drained(&mut self) {
        if self.read > 0 && self.read == self.buf.len() {
            self.purge();
        }
    }

    /// Pulls from the socket until at least `min` new bytes arrived, or once
    /// when `min` is `None`.
    fn fill(&mut self, min: Option<usize>) -> Result<()> {
        let target = min.unwrap_or(1);
        let mut received = 0;
        while received < target {
            let start = self.buf.len();
            self.buf.resize(start + self.read_size, 0);
            let count = match self.stream.read(&mut self.buf[start..]) {
                Ok(0) => {
                    self.buf.truncate(start);
                    return Err(Error::Connection(SERVER_CLOSED_CONNECTION.to_string()));
                }
                Ok(count) => count,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {
                    self.buf.truncate(start);
                    continue;
                }
                Err(err) => {
                    self.buf.truncate(start);
                    return Err(Error::from_io(err, "reading from socket"));
                }
            };
            self.buf.truncate(start + count);
            received += count;
        }
        trace!(bytes = received, buffered = self.len(), "socket read");
        Ok(())
    }
}

impl<S: Write> SocketBuffer<S> {
    /// Writes the whole buffer to the underlying stream.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .and_then(|_| self.stream.flush())
            .map_err(|err| Error::from_io(err, "writing to socket"))?;
        trace!(bytes = data.len(), "socket write");
        Ok(())
    }
}

impl<S: Read> FrameSource for SocketBuffer<S> {
    type Error = Error;

    fn read_line(&mut self) -> Result<&[u8]> {
        SocketBuffer::read_line(self)
    }

    fn read_payload(&mut self, len: usize) -> Result<&[u8]> {
        SocketBuffer::read_exact(self, len)
    }
}
