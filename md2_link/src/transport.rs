//! The byte-stream abstraction the link drives.
//!
//! A small pluggable-driver trait, the same shape as a HAL driver with a
//! real backend and a simulation backend used in tests: production wires a
//! real `TcpStream`, tests and `--dry-run` wire [`LoopbackTransport`], a
//! small in-memory byte pipe that can be scripted to return canned responses.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Anything the link can read from and write to. Blanket-implemented for
/// any `Read + Write + Send`, so a live `TcpStream` needs no wrapper.
pub trait PmacTransport: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl PmacTransport for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Connect to the controller at `addr`.
pub fn connect(addr: &str) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// An in-memory byte pipe used by tests and `--dry-run` mode: writes go
/// into an outbound log callers can inspect, reads are served from a
/// pre-loaded response queue.
pub struct LoopbackTransport {
    pub written: Vec<u8>,
    pending: std::collections::VecDeque<u8>,
    read_timeout: Option<Duration>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            written: Vec::new(),
            pending: std::collections::VecDeque::new(),
            read_timeout: None,
        }
    }

    /// Queue bytes to be returned by subsequent `read` calls.
    pub fn queue_response(&mut self, bytes: &[u8]) {
        self.pending.extend(bytes.iter().copied());
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for LoopbackTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no queued bytes"));
        }
        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for LoopbackTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PmacTransport for LoopbackTransport {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_echoes_queued_bytes() {
        let mut t = LoopbackTransport::new();
        t.queue_response(&[0x06]);
        let mut buf = [0u8; 4];
        let n = t.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x06]);
    }

    #[test]
    fn loopback_records_writes() {
        let mut t = LoopbackTransport::new();
        t.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(t.written, vec![1, 2, 3]);
    }
}
