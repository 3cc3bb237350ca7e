//! Transports over `std::io` streams.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use super::Transport;
use crate::{PacketError, Result};

fn map_io_error(err: std::io::Error, timeout: Duration) -> PacketError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            PacketError::Timeout { duration: timeout }
        }
        _ => PacketError::from(err),
    }
}

/// Transport over any blocking `Read + Write` stream (serial device file, pipe,
/// capture file).
///
/// Timeouts are whatever the underlying stream was configured with; the `timeout`
/// argument is only reported back in `PacketError::Timeout`.
#[derive(Debug)]
pub struct IoTransport<T> {
    inner: T,
}

impl<T: Read + Write> IoTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write> Transport for IoTransport<T> {
    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        self.inner.write_all(bytes).map_err(|e| map_io_error(e, timeout))?;
        self.inner.flush().map_err(|e| map_io_error(e, timeout))?;
        Ok(bytes.len())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        self.inner.read(buffer).map_err(|e| map_io_error(e, timeout))
    }
}

/// Transport over a TCP connection, applying each call's timeout to the socket.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to a peer, failing after `timeout`.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        info!("Connecting to {}", addr);
        let stream = TcpStream::connect_timeout(&addr, socket_timeout(timeout)).map_err(|e| {
            PacketError::transport_failed_with_source(format!("Connecting to {}", addr), Box::new(e))
        })?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

// A zero socket timeout is rejected by the OS layer
fn socket_timeout(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        self.stream.set_write_timeout(Some(socket_timeout(timeout)))?;
        self.stream.write_all(bytes).map_err(|e| map_io_error(e, timeout))?;
        Ok(bytes.len())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        self.stream.set_read_timeout(Some(socket_timeout(timeout)))?;
        let count = self.stream.read(buffer).map_err(|e| map_io_error(e, timeout))?;
        if count == 0 {
            debug!("Peer closed the connection");
        }
        Ok(count)
    }
}
