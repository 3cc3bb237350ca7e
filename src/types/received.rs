//! Completed telemetry packets shared across tasks.

use std::sync::Arc;

use crate::codec::FieldReader;
use crate::context::Timestamp;
use crate::telemetry::payloads::TelemetryPayload;
use crate::telemetry::{TELEMETRY_HEADER_SIZE, TelemetryHeader};
use crate::{PacketError, Result};

/// Checksum-validated telemetry packet.
///
/// Cloning is cheap: the packet bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Whole packet, header included (zero-copy via Arc)
    pub data: Arc<[u8]>,

    /// Decoded header
    pub header: TelemetryHeader,

    /// Routing tag of the packet's type
    pub notification_tag: u32,
}

impl ReceivedPacket {
    pub fn new(data: Vec<u8>, header: TelemetryHeader, notification_tag: u32) -> Self {
        Self { data: data.into(), header, notification_tag }
    }

    pub fn packet_type(&self) -> u8 {
        self.header.packet_type
    }

    pub fn source_id(&self) -> u8 {
        self.header.source_id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    pub fn notification_tag(&self) -> u32 {
        self.notification_tag
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn payload_bytes(&self) -> &[u8] {
        let end = self.data.len().min(self.header.packet_len());
        self.data.get(TELEMETRY_HEADER_SIZE..end).unwrap_or(&[])
    }

    /// Decode the payload as `T`.
    ///
    /// Lengths were validated against the registry when the packet was received,
    /// so only the type is checked here.
    pub fn decode<T: TelemetryPayload>(&self) -> Result<T> {
        if self.header.packet_type != T::PACKET_TYPE {
            return Err(PacketError::TypeMismatch {
                expected: T::PACKET_TYPE,
                found: self.header.packet_type,
            });
        }
        T::decode(&mut FieldReader::new(self.payload_bytes()))
    }

    /// Whether the payload decodes as `T`.
    pub fn is<T: TelemetryPayload>(&self) -> bool {
        self.header.packet_type == T::PACKET_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::payloads::{CommandAck, TextMessage};
    use crate::test_utils::telemetry_bytes;

    #[test]
    fn decodes_only_its_own_type() {
        let bytes = telemetry_bytes(&TextMessage::new("pivot stalled"));
        let header = TelemetryHeader::parse(&bytes).unwrap();
        let packet = ReceivedPacket::new(bytes.clone(), header, 102);

        assert!(packet.is::<TextMessage>());
        assert_eq!(packet.decode::<TextMessage>().unwrap().text, "pivot stalled");
        assert!(matches!(
            packet.decode::<CommandAck>(),
            Err(PacketError::TypeMismatch { expected: 0x02, found: 0x03 })
        ));
        assert_eq!(packet.payload_bytes(), b"pivot stalled");

        let clone = packet.clone();
        assert!(Arc::ptr_eq(&clone.data, &packet.data));
    }
}
