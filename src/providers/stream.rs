//! Provider reading a live byte stream

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace};

use crate::framing::{ChunkBuffer, Reassemble};
use crate::provider::Provider;
use crate::telemetry::TelemetryPacket;
use crate::types::ReceivedPacket;
use crate::{PacketContext, PacketError, Result};

const READ_CHUNK: usize = 4096;

/// Provider over any async byte stream (TCP socket, serial device, pipe)
///
/// Bytes left over after a completed packet stay buffered for the next call,
/// so several packets arriving in one read are all delivered.
pub struct StreamProvider<R> {
    /// Byte source
    reader: R,

    /// Reassembly state, survives partial reads
    packet: TelemetryPacket,

    /// Last chunk read and the unscanned part of it
    chunks: ChunkBuffer,

    /// Give up on a silent link after this long
    read_timeout: Option<Duration>,

    label: String,
}

impl<R> StreamProvider<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, ctx: Arc<PacketContext>) -> Self {
        info!("Telemetry stream provider created (source {:#04x})", ctx.source_id());
        Self {
            reader,
            packet: TelemetryPacket::new(ctx),
            chunks: ChunkBuffer::new(READ_CHUNK),
            read_timeout: None,
            label: "stream".to_string(),
        }
    }

    /// Report `PacketError::Timeout` when no byte arrives within `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    async fn fill(&mut self) -> Result<usize> {
        let read = self.reader.read(self.chunks.spare());
        let count = match self.read_timeout {
            Some(duration) => tokio::time::timeout(duration, read)
                .await
                .map_err(|_| PacketError::Timeout { duration })??,
            None => read.await?,
        };
        Ok(count)
    }
}

#[async_trait::async_trait]
impl<R> Provider for StreamProvider<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_packet(&mut self) -> Result<Option<ReceivedPacket>> {
        if self.packet.is_completed() {
            self.packet.reset();
        }

        loop {
            if self.chunks.feed(&mut self.packet) {
                trace!("{}: packet complete, {} bytes buffered", self.label, self.chunks.buffered());
                return self.packet.snapshot().map(Some);
            }

            let count = self.fill().await?;
            if count == 0 {
                if !self.packet.is_reset() {
                    debug!("{}: stream ended inside a packet", self.label);
                }
                info!("{}: stream ended ({} framing errors)", self.label, self.chunks.errors());
                return Ok(None);
            }
            self.chunks.filled(count);
        }
    }

    fn framing_errors(&self) -> u32 {
        self.chunks.errors()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
