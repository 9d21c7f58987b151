//! The live connection to the server
//!
//! Outbound bytes are accumulated in a small buffer and written when a line
//! is complete or the buffer fills. The buffer sits behind a mutex so the
//! signal bridge can append its fixed directives between request lines.

use crate::error::TransportError;
use crate::protocol::AUTH_PREFIX;
use crate::transport::Transport;
use nix::sys::socket::{setsockopt, sockopt};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Size of the write-accumulation buffer
pub const SEND_BUFFER_SIZE: usize = 4096;

/// Largest single read from the socket
pub const RECV_CHUNK: usize = 8192;

/// The socket behind a connection
#[derive(Debug)]
pub enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    pub fn try_clone(&self) -> io::Result<Self> {
        match self {
            Stream::Unix(s) => s.try_clone().map(Stream::Unix),
            Stream::Tcp(s) => s.try_clone().map(Stream::Tcp),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.set_read_timeout(timeout),
            Stream::Tcp(s) => s.set_read_timeout(timeout),
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.shutdown(Shutdown::Both),
            Stream::Tcp(s) => s.shutdown(Shutdown::Both),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

/// Write-accumulation buffer in front of a writer
#[derive(Debug)]
pub struct Outbound<W: Write> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: Write> Outbound<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::with_capacity(SEND_BUFFER_SIZE),
        }
    }

    /// Append `data`, writing out whenever the buffer fills or ends in a newline
    pub fn send(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let room = SEND_BUFFER_SIZE - self.buf.len();
            let (part, rest) = data.split_at(data.len().min(room));
            self.buf.extend_from_slice(part);
            data = rest;

            if self.buf.len() == SEND_BUFFER_SIZE || self.buf.last() == Some(&b'\n') {
                self.flush_pending()?;
            }
        }
        Ok(())
    }

    /// Write every buffered byte, re-issuing the remainder after short writes.
    /// Bytes not yet accepted stay buffered if an error is returned.
    pub fn flush_pending(&mut self) -> io::Result<()> {
        let mut sent = 0;
        let result = loop {
            if sent == self.buf.len() {
                break Ok(());
            }
            match self.writer.write(&self.buf[sent..]) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "server stopped accepting data",
                    ))
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.buf.drain(..sent);
        result.and_then(|()| self.writer.flush())
    }

    /// Bytes accepted by [`send`](Self::send) but not yet written
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

/// Shared handle on an [`Outbound`] buffer
#[derive(Debug)]
pub struct SharedOutbound<W: Write>(Arc<Mutex<Outbound<W>>>);

impl<W: Write> Clone for SharedOutbound<W> {
    fn clone(&self) -> Self {
        SharedOutbound(Arc::clone(&self.0))
    }
}

impl<W: Write> SharedOutbound<W> {
    pub fn new(writer: W) -> Self {
        SharedOutbound(Arc::new(Mutex::new(Outbound::new(writer))))
    }

    /// Send `data` under a single lock, so it cannot interleave with other senders
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        self.lock().send(data)
    }

    pub fn flush_pending(&self) -> io::Result<()> {
        self.lock().flush_pending()
    }

    pub fn lock(&self) -> MutexGuard<'_, Outbound<W>> {
        // A panic while holding the lock leaves the buffer intact.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An open session channel: a read half and a shared, buffered write half
#[derive(Debug)]
pub struct Connection {
    reader: Stream,
    outbound: SharedOutbound<Stream>,
    closed: bool,
}

impl Connection {
    /// Connect to `transport`. Remote connections are authenticated by
    /// queuing `-auth <token> ` ahead of anything else on the stream.
    pub fn open(transport: &Transport) -> Result<Self, TransportError> {
        match transport {
            Transport::Local(path) => {
                let stream = UnixStream::connect(path).map_err(|e| match e.kind() {
                    io::ErrorKind::NotFound => TransportError::Unreachable,
                    _ => TransportError::Refused { source: e },
                })?;
                Self::from_stream(Stream::Unix(stream)).map_err(|e| TransportError::Refused { source: e })
            }
            Transport::Remote { addr, token } => {
                let stream = TcpStream::connect(addr).map_err(|e| TransportError::Refused { source: e })?;
                let linger = libc::linger { l_onoff: 1, l_linger: 1 };
                if let Err(e) = setsockopt(&stream, sockopt::Linger, &linger) {
                    tracing::debug!(error = %e, "could not set SO_LINGER");
                }

                let conn = Self::from_stream(Stream::Tcp(stream))
                    .map_err(|e| TransportError::Refused { source: e })?;
                let mut auth = Vec::with_capacity(AUTH_PREFIX.len() + token.len() + 1);
                auth.extend_from_slice(AUTH_PREFIX);
                auth.extend_from_slice(token);
                auth.push(b' ');
                conn.send(&auth).map_err(|e| TransportError::Refused { source: e })?;
                Ok(conn)
            }
        }
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: Stream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        Ok(Self {
            reader,
            outbound: SharedOutbound::new(stream),
            closed: false,
        })
    }

    /// Queue `data` for the server; see [`Outbound::send`]
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        self.outbound.send(data)
    }

    /// Handle for other senders (the signal bridge, reply handlers)
    pub fn outbound(&self) -> SharedOutbound<Stream> {
        self.outbound.clone()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.reader.set_read_timeout(timeout)
    }

    /// One blocking read of at most `buf.len()` bytes; `Ok(0)` is end of stream.
    /// Anything still buffered for the server is written first, and reads
    /// interrupted by a signal are retried.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.outbound.flush_pending()?;
        loop {
            match self.reader.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }

    /// Flush and shut the socket down. Safe to call more than once.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let flushed = self.outbound.flush_pending();
        match self.reader.shutdown() {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
            _ => {}
        }
        flushed
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
