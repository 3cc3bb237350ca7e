//! Drive packet reassembly from a transport.

use std::time::Duration;

use tracing::{debug, trace};

use super::Transport;
use crate::Result;
use crate::framing::{ChunkBuffer, Reassemble};

const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Reads chunks from a transport and feeds them to packets until one completes.
///
/// Bytes that arrive after a completed packet are kept and fed to the next
/// [`receive`](Self::receive) call, so back-to-back packets in one read are never
/// lost. Framing errors are recovered from automatically and counted.
#[derive(Debug)]
pub struct PacketReceiver<T> {
    transport: T,
    timeout: Duration,
    chunks: ChunkBuffer,
}

impl<T: Transport> PacketReceiver<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self::with_chunk_size(transport, timeout, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(transport: T, timeout: Duration, chunk_size: usize) -> Self {
        Self { transport, timeout, chunks: ChunkBuffer::new(chunk_size) }
    }

    /// Receive the next packet into `packet`.
    ///
    /// A packet still holding a completed packet from an earlier call is reset
    /// first. Returns `Ok(false)` when the transport reports end of stream. On
    /// `PacketError::Timeout` the partial packet is kept, so a later call resumes
    /// it; callers that give up on it call `reset()`.
    pub fn receive<P: Reassemble>(&mut self, packet: &mut P) -> Result<bool> {
        if packet.is_completed() {
            packet.reset();
        }

        loop {
            if self.chunks.feed(packet) {
                trace!("Packet completed, {} buffered bytes left", self.chunks.buffered());
                return Ok(true);
            }

            let count = self.transport.receive(self.chunks.spare(), self.timeout)?;
            if count == 0 {
                debug!("Transport reached end of stream ({} framing errors)", self.chunks.errors());
                return Ok(false);
            }
            self.chunks.filled(count);
        }
    }

    /// Framing errors recovered from so far.
    pub fn errors(&self) -> u32 {
        self.chunks.errors()
    }

    /// Bytes read from the transport but not yet scanned.
    pub fn buffered(&self) -> usize {
        self.chunks.buffered()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}
