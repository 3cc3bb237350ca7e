//! Replay provider for recorded telemetry captures

use std::path::Path;
use std::sync::Arc;

use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, info, trace};

use crate::framing::Reassemble;
use crate::provider::Provider;
use crate::telemetry::{TelemetryHeader, TelemetryPacket};
use crate::types::ReceivedPacket;
use crate::{PacketContext, PacketError, Result};

/// Replay provider over a capture file: the raw downlink byte stream as recorded
/// by the ground station.
///
/// Well-formed packets are taken whole with a single verification; corrupted
/// regions fall back to byte-wise resynchronization.
pub struct CaptureProvider {
    /// Capture contents
    data: Vec<u8>,

    /// Offset of the next unread byte
    cursor: usize,

    /// Reassembly state used for resynchronization
    packet: TelemetryPacket,

    /// Framing errors recovered from
    errors: u32,

    /// Optional replay pacing
    pacing: Option<Interval>,

    label: String,
}

impl CaptureProvider {
    /// Load a capture file.
    pub async fn open<P: AsRef<Path>>(path: P, ctx: Arc<PacketContext>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|e| PacketError::io_error(path, e))?;
        info!("Opened capture file {} ({} bytes)", path.display(), data.len());
        Ok(Self::from_bytes(data, ctx).with_label(path.display().to_string()))
    }

    /// Replay an in-memory capture.
    pub fn from_bytes(data: Vec<u8>, ctx: Arc<PacketContext>) -> Self {
        Self {
            data,
            cursor: 0,
            packet: TelemetryPacket::new(ctx),
            errors: 0,
            pacing: None,
            label: "capture".to_string(),
        }
    }

    /// Deliver at most `packets_per_second` packets per second.
    pub fn with_rate(mut self, packets_per_second: f64) -> Self {
        let rate = packets_per_second.clamp(0.1, 100_000.0);
        let mut pacing = interval(Duration::from_secs_f64(1.0 / rate));
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Capture replay paced at {} packets/s", rate);
        self.pacing = Some(pacing);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Bytes not replayed yet
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take a whole packet at the cursor if one starts there and verifies.
    fn take_framed(&mut self) -> bool {
        let rest = &self.data[self.cursor..];
        let Ok(header) = TelemetryHeader::parse(rest) else {
            return false;
        };
        let Some(candidate) = rest.get(..header.packet_len()) else {
            return false;
        };
        if self.packet.load_buffer(candidate).is_err() {
            return false;
        }
        self.cursor += candidate.len();
        true
    }

    fn next_completed(&mut self) -> bool {
        self.packet.reset();
        if self.take_framed() {
            return true;
        }
        trace!("{}: resynchronizing at offset {}", self.label, self.cursor);
        self.packet.process_input(&self.data, &mut self.cursor, &mut self.errors)
    }
}

#[async_trait::async_trait]
impl Provider for CaptureProvider {
    async fn next_packet(&mut self) -> Result<Option<ReceivedPacket>> {
        if !self.next_completed() {
            info!("{}: end of capture ({} framing errors)", self.label, self.errors);
            return Ok(None);
        }

        if let Some(pacing) = self.pacing.as_mut() {
            pacing.tick().await;
        }

        trace!(
            "{}: packet type={:#04x} at offset {}",
            self.label,
            self.packet.packet_type(),
            self.cursor
        );
        self.packet.snapshot().map(Some)
    }

    fn framing_errors(&self) -> u32 {
        self.errors
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::payloads::{DetectorEvents, FdrStatus, TextMessage};
    use crate::test_utils::{telemetry_bytes, test_context};
    use std::io::Write;

    fn capture() -> Vec<u8> {
        let mut data = telemetry_bytes(&TextMessage::new("boot"));
        // Corrupted packet followed by noise
        let mut corrupted = telemetry_bytes(&FdrStatus::default());
        corrupted[20] ^= 0x08;
        data.extend_from_slice(&corrupted);
        data.extend_from_slice(&[0x55; 7]);
        data.extend(telemetry_bytes(&DetectorEvents { words: vec![5, 6] }));
        data
    }

    #[tokio::test]
    async fn replays_and_resynchronizes() {
        let mut provider = CaptureProvider::from_bytes(capture(), test_context());
        let first = provider.next_packet().await.unwrap().unwrap();
        assert!(first.is::<TextMessage>());

        let second = provider.next_packet().await.unwrap().unwrap();
        assert_eq!(second.decode::<DetectorEvents>().unwrap().words, vec![5, 6]);
        assert_eq!(provider.framing_errors(), 2);

        assert!(provider.next_packet().await.unwrap().is_none());
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn opens_files_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&capture()).unwrap();

        let mut provider = CaptureProvider::open(file.path(), test_context()).await.unwrap();
        let mut count = 0;
        while provider.next_packet().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let result = CaptureProvider::open("/nonexistent/flight.cap", test_context()).await;
        match result {
            Err(PacketError::Io { path, .. }) => assert!(path.ends_with("flight.cap")),
            other => panic!("expected Io error, got {:?}", other.map(|p| p.len())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spaces_packets() {
        let mut data = Vec::new();
        for _ in 0..3 {
            data.extend(telemetry_bytes(&TextMessage::new("tick")));
        }
        let mut provider = CaptureProvider::from_bytes(data, test_context()).with_rate(10.0);

        let start = tokio::time::Instant::now();
        while provider.next_packet().await.unwrap().is_some() {}
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
