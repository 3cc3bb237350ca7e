//! In-memory transport.

use std::collections::VecDeque;
use std::time::Duration;

use super::Transport;
use crate::{PacketError, Result};

/// Transport backed by memory queues.
///
/// Sent bytes accumulate in an outbound buffer; received bytes come from an inbound
/// queue, optionally in chunks no larger than `chunk_limit` to mimic a serial line
/// delivering a packet across many reads.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    chunk_limit: Option<usize>,
    closed: bool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose inbound queue holds `bytes` and then reports end of stream.
    pub fn with_input(bytes: &[u8]) -> Self {
        let mut transport = Self::new();
        transport.push_input(bytes);
        transport.close();
        transport
    }

    /// Deliver at most `limit` bytes per `receive` call.
    pub fn with_chunk_limit(mut self, limit: usize) -> Self {
        self.chunk_limit = Some(limit.max(1));
        self
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Report end of stream once the inbound queue drains.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Move everything sent so far to the inbound queue.
    pub fn loop_back(&mut self) {
        let sent = std::mem::take(&mut self.outbound);
        self.inbound.extend(sent);
    }

    pub fn sent(&self) -> &[u8] {
        &self.outbound
    }

    pub fn take_sent(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    pub fn pending_input(&self) -> usize {
        self.inbound.len()
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, bytes: &[u8], _timeout: Duration) -> Result<usize> {
        self.outbound.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.inbound.is_empty() {
            return if self.closed { Ok(0) } else { Err(PacketError::Timeout { duration: timeout }) };
        }

        let limit = self.chunk_limit.unwrap_or(usize::MAX);
        let count = buffer.len().min(limit).min(self.inbound.len());
        for (slot, byte) in buffer.iter_mut().zip(self.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_chunks_then_ends() {
        let mut transport = LoopbackTransport::with_input(&[1, 2, 3, 4, 5]).with_chunk_limit(2);
        let mut buffer = [0u8; 8];
        let timeout = Duration::from_millis(10);

        assert_eq!(transport.receive(&mut buffer, timeout).unwrap(), 2);
        assert_eq!(&buffer[..2], &[1, 2]);
        assert_eq!(transport.receive(&mut buffer, timeout).unwrap(), 2);
        assert_eq!(transport.receive(&mut buffer, timeout).unwrap(), 1);
        assert_eq!(buffer[0], 5);
        assert_eq!(transport.receive(&mut buffer, timeout).unwrap(), 0);
    }

    #[test]
    fn open_empty_queue_times_out() {
        let mut transport = LoopbackTransport::new();
        let mut buffer = [0u8; 4];
        let result = transport.receive(&mut buffer, Duration::from_millis(5));
        assert!(matches!(result, Err(PacketError::Timeout { .. })));
    }

    #[test]
    fn loop_back_moves_sent_bytes() {
        let mut transport = LoopbackTransport::new();
        transport.send(&[9, 8, 7], Duration::ZERO).unwrap();
        assert_eq!(transport.sent(), &[9, 8, 7]);
        transport.loop_back();
        assert!(transport.sent().is_empty());
        assert_eq!(transport.pending_input(), 3);
    }
}
