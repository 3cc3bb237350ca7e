//! Driver spawns and manages the link reader task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::PacketError;
use crate::provider::Provider;
use crate::types::{LinkStats, ReceivedPacket};

/// Default number of packets buffered for slow subscribers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Consecutive provider failures tolerated before the reader gives up
const MAX_ERRORS: u32 = 10;

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Receiver for completed packets, positioned at the first packet
    pub packets: broadcast::Receiver<Arc<ReceivedPacket>>,
    /// Receiver for link statistics
    pub stats: watch::Receiver<LinkStats>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Driver spawns the reader task that owns a [`Provider`]
///
/// Every completed packet is published once on a broadcast channel so any number
/// of subscribers can filter it by type or notification tag. Statistics are
/// published on a watch channel after each packet.
pub struct Driver;

impl Driver {
    /// Spawn the reader task for the given provider
    pub fn spawn<P>(provider: P, capacity: usize) -> DriverChannels
    where
        P: Provider,
    {
        let (packet_tx, packet_rx) = broadcast::channel(capacity.max(1));
        let (stats_tx, stats_rx) = watch::channel(LinkStats::default());
        let cancel = CancellationToken::new();

        let cancel_reader = cancel.clone();
        tokio::spawn(async move {
            Self::reader_task(provider, packet_tx, stats_tx, cancel_reader).await;
        });

        DriverChannels { packets: packet_rx, stats: stats_rx, cancel }
    }

    /// Reader task - pulls packets until the source ends or the link is cancelled
    async fn reader_task<P>(
        mut provider: P,
        packet_tx: broadcast::Sender<Arc<ReceivedPacket>>,
        stats_tx: watch::Sender<LinkStats>,
        cancel: CancellationToken,
    ) where
        P: Provider,
    {
        let source = provider.describe();
        info!("Link reader started for {}", source);
        let mut error_count = 0u32;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Link reader for {} cancelled", source);
                    break;
                }
                result = provider.next_packet() => result,
            };

            match result {
                Ok(Some(packet)) => {
                    error_count = 0;
                    let (packet_type, timestamp) = (packet.packet_type(), packet.timestamp());
                    trace!("{}: packet type={:#04x} tag={}", source, packet_type, packet.notification_tag());

                    let framing_errors = provider.framing_errors();
                    stats_tx.send_modify(|stats| {
                        stats.record(packet_type, timestamp);
                        stats.framing_errors = framing_errors;
                    });

                    // No subscriber is not an error: the packet is simply dropped
                    if packet_tx.send(Arc::new(packet)).is_err() {
                        trace!("No subscribers for packet type={:#04x}", packet_type);
                    }
                }
                Ok(None) => {
                    info!("{} ended after {} packets", source, stats_tx.borrow().packets);
                    break;
                }
                Err(PacketError::Timeout { duration }) => {
                    debug!("{} quiet for {:?}", source, duration);
                }
                Err(e) => {
                    error_count += 1;
                    error!("Provider error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many provider errors on {}, shutting down", source);
                        break;
                    }

                    // Exponential backoff: 100ms, 200ms, 400ms, ...
                    let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        let framing_errors = provider.framing_errors();
        stats_tx.send_modify(|stats| {
            stats.framing_errors = framing_errors;
            stats.finished = true;
        });
        info!("Link reader for {} ended", source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::providers::CaptureProvider;
    use crate::telemetry::payloads::{Housekeeping, TextMessage};
    use crate::test_utils::{telemetry_bytes, test_context};

    struct FailingProvider;

    #[async_trait::async_trait]
    impl Provider for FailingProvider {
        async fn next_packet(&mut self) -> Result<Option<ReceivedPacket>> {
            Err(PacketError::transport_failed("line down"))
        }

        fn framing_errors(&self) -> u32 {
            0
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[tokio::test]
    async fn publishes_packets_and_stats() {
        let mut data = telemetry_bytes(&TextMessage::new("a"));
        data.extend(telemetry_bytes(&Housekeeping::default()));
        data.extend([0x01, 0x02]);
        data.extend(telemetry_bytes(&Housekeeping::default()));

        let mut channels = Driver::spawn(CaptureProvider::from_bytes(data, test_context()), 16);

        let mut types = Vec::new();
        while let Ok(packet) = channels.packets.recv().await {
            types.push(packet.packet_type());
        }
        assert_eq!(types, vec![0x03, 0x40, 0x40]);

        channels.stats.wait_for(|s| s.finished).await.unwrap();
        let stats = channels.stats.borrow().clone();
        assert_eq!(stats.packets, 3);
        assert_eq!(stats.count_of(0x40), 2);
        assert_eq!(stats.framing_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_repeated_failures() {
        let mut channels = Driver::spawn(FailingProvider, 4);
        channels.stats.wait_for(|s| s.finished).await.unwrap();
        assert!(matches!(
            channels.packets.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_the_reader() {
        let (client, _server) = tokio::io::duplex(64);
        let provider = crate::providers::StreamProvider::new(client, test_context());
        let mut channels = Driver::spawn(provider, 4);

        channels.cancel.cancel();
        channels.stats.wait_for(|s| s.finished).await.unwrap();
        assert!(channels.packets.recv().await.is_err());
    }
}
