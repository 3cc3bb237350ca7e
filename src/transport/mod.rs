//! Transport contract and blocking implementations.
//!
//! Packets never talk to a device directly. Anything that can move bytes with a
//! timeout implements [`Transport`]: a serial port, a socket, a capture file, or the
//! in-memory [`LoopbackTransport`] used by tests. [`PacketReceiver`] drives the
//! reassembly state machines from any transport.

mod io;
mod loopback;
mod receiver;

use std::time::Duration;

use crate::Result;

pub use io::{IoTransport, TcpTransport};
pub use loopback::LoopbackTransport;
pub use receiver::PacketReceiver;

/// Minimal byte-moving capability required by the packet layer.
pub trait Transport {
    /// Send `bytes`, returning how many were written before `timeout` expired.
    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize>;

    /// Receive into `buffer`, returning how many bytes arrived.
    ///
    /// Returns `Ok(0)` when the stream has ended and `PacketError::Timeout` when no
    /// byte arrived within `timeout`.
    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        (**self).send(bytes, timeout)
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive(buffer, timeout)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize> {
        (**self).send(bytes, timeout)
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive(buffer, timeout)
    }
}

/// Send all of `bytes` or fail.
pub fn send_all<T: Transport + ?Sized>(transport: &mut T, bytes: &[u8], timeout: Duration) -> Result<()> {
    let sent = transport.send(bytes, timeout)?;
    if sent != bytes.len() {
        return Err(crate::PacketError::transport_failed(format!(
            "Short write: {} of {} bytes sent",
            sent,
            bytes.len()
        )));
    }
    Ok(())
}
