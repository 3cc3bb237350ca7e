//! Telemetry link connection

use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{DEFAULT_CHANNEL_CAPACITY, Driver};
use crate::provider::Provider;
use crate::providers::{CaptureProvider, StreamProvider};
use crate::telemetry::payloads::TelemetryPayload;
use crate::types::{LinkStats, ReceivedPacket};
use crate::{PacketContext, Result};

/// Connection to one telemetry source.
///
/// The first packet stream taken from a connection sees every packet since the
/// link opened, up to the channel capacity. Streams taken later start at the next
/// packet. Dropping the connection stops the reader task.
pub struct LinkConnection {
    /// Receiver created with the channel, handed to the first subscriber
    initial: Mutex<Option<broadcast::Receiver<Arc<ReceivedPacket>>>>,

    /// Template for later subscribers
    packets: broadcast::Receiver<Arc<ReceivedPacket>>,

    /// Statistics watch receiver
    stats: watch::Receiver<LinkStats>,

    /// Packet context shared with the provider
    ctx: Arc<PacketContext>,

    /// Cancellation token for stopping the reader
    cancel: CancellationToken,
}

impl LinkConnection {
    /// Replay a capture file.
    pub async fn open_capture<P: AsRef<Path>>(path: P, ctx: Arc<PacketContext>) -> Result<Self> {
        let provider = CaptureProvider::open(path, Arc::clone(&ctx)).await?;
        Ok(Self::from_provider(provider, ctx, DEFAULT_CHANNEL_CAPACITY))
    }

    /// Read telemetry from a live byte stream.
    pub fn from_reader<R>(reader: R, ctx: Arc<PacketContext>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let provider = StreamProvider::new(reader, Arc::clone(&ctx));
        Self::from_provider(provider, ctx, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Start a reader task over any provider.
    pub fn from_provider<P: Provider>(provider: P, ctx: Arc<PacketContext>, capacity: usize) -> Self {
        info!("Opening telemetry link on {}", provider.describe());
        let channels = Driver::spawn(provider, capacity);
        let packets = channels.packets.resubscribe();

        Self {
            initial: Mutex::new(Some(channels.packets)),
            packets,
            stats: channels.stats,
            ctx,
            cancel: channels.cancel,
        }
    }

    fn receiver(&self) -> broadcast::Receiver<Arc<ReceivedPacket>> {
        let mut initial = self.initial.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        initial.take().unwrap_or_else(|| self.packets.resubscribe())
    }

    /// Every completed packet.
    pub fn packets(&self) -> impl Stream<Item = Arc<ReceivedPacket>> + 'static {
        BroadcastStream::new(self.receiver()).filter_map(|result| async move {
            match result {
                Ok(packet) => Some(packet),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged, {} packets skipped", skipped);
                    None
                }
            }
        })
    }

    /// Decoded payloads of one telemetry type.
    ///
    /// Packets whose payload fails to decode are logged and skipped.
    pub fn subscribe<T>(&self) -> impl Stream<Item = T> + 'static
    where
        T: TelemetryPayload + Send + 'static,
    {
        self.packets().filter_map(|packet| async move {
            if !packet.is::<T>() {
                return None;
            }
            match packet.decode::<T>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Dropping undecodable packet type={:#04x}: {}", packet.packet_type(), e);
                    None
                }
            }
        })
    }

    /// Packets routed to one notification tag.
    pub fn notifications(&self, tag: u32) -> impl Stream<Item = Arc<ReceivedPacket>> + 'static {
        self.packets().filter(move |packet| std::future::ready(packet.notification_tag() == tag))
    }

    /// Current link statistics.
    pub fn stats(&self) -> LinkStats {
        self.stats.borrow().clone()
    }

    /// Statistics after every change.
    pub fn stats_updates(&self) -> impl Stream<Item = LinkStats> + 'static {
        WatchStream::new(self.stats.clone())
    }

    /// Wait until the source is exhausted or the reader stopped.
    pub async fn finished(&self) -> LinkStats {
        let mut stats = self.stats.clone();
        if stats.wait_for(|s| s.finished).await.is_err() {
            debug!("Link reader dropped before finishing");
        }
        stats.borrow().clone()
    }

    pub fn context(&self) -> &Arc<PacketContext> {
        &self.ctx
    }

    /// Stop the reader task. Streams end once buffered packets are drained.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LinkConnection {
    fn drop(&mut self) {
        debug!("Dropping telemetry link");
        self.cancel.cancel();
    }
}
