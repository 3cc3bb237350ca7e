//! Downlink telemetry packets.
//!
//! ```text
//! offset  size  field
//!      0     2  sync word 0xC39A (9A C3 on the wire)
//!      2     1  telemetry type
//!      3     1  source node id
//!      4     2  payload length in bytes
//!      6     2  checksum
//!      8     4  timestamp, nanoseconds part
//!     12     4  timestamp, seconds part
//!     16     n  payload
//! ```
//!
//! The payload layout of each type is described by the context's
//! [`TypeSchemaRegistry`](crate::TypeSchemaRegistry) and decoded through
//! [`TelemetryPayload`] implementations. Setting a payload marks the packet
//! altered; the checksum is recomputed once when the packet is finalized.
//!
//! ```rust
//! use gondola::telemetry::payloads::CommandAck;
//! use gondola::{PacketContext, TelemetryPacket};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(PacketContext::new(0x03));
//! let mut packet = TelemetryPacket::new(Arc::clone(&ctx));
//! packet.create(gondola::packet_type::COMMAND_ACK)?;
//! packet.set_payload(&CommandAck { target_id: 0x02, sequence_id: 7, ..Default::default() })?;
//! let bytes = packet.finalize_output_packet()?.to_vec();
//!
//! let mut received = TelemetryPacket::new(ctx);
//! received.load_buffer(&bytes)?;
//! assert_eq!(received.source_id(), 0x03);
//! assert_eq!(received.payload::<CommandAck>()?.sequence_id, 7);
//! # Ok::<(), gondola::PacketError>(())
//! ```

pub mod payloads;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::buffer::PacketBuffer;
use crate::codec::{self, FieldReader, FieldWriter};
use crate::context::Timestamp;
use crate::framing::{self, PacketState, Reassemble, SYNC_BYTES, SYNC_WORD, ScanStep};
use crate::registry::{TypeSchemaEntry, packet_type};
use crate::transport::{self, Transport};
use crate::types::ReceivedPacket;
use crate::{PacketContext, PacketError, Result};

use self::payloads::{ErrorReport, TelemetryPayload};

/// Size of the telemetry header in bytes.
pub const TELEMETRY_HEADER_SIZE: usize = 16;

const TYPE_OFFSET: usize = 2;
const SOURCE_OFFSET: usize = 3;
const LENGTH_OFFSET: usize = 4;
const NANOS_OFFSET: usize = 8;
const SECONDS_OFFSET: usize = 12;

/// Decoded telemetry header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryHeader {
    pub sync: u16,
    pub packet_type: u8,
    pub source_id: u8,
    pub data_len: u16,
    pub checksum: u16,
    pub timestamp: Timestamp,
}

impl TelemetryHeader {
    pub const SIZE: usize = TELEMETRY_HEADER_SIZE;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(PacketError::EndOfPacket { requested: Self::SIZE, remaining: data.len() });
        }
        Ok(Self {
            sync: codec::read_u16_le(data, 0)?,
            packet_type: data[TYPE_OFFSET],
            source_id: data[SOURCE_OFFSET],
            data_len: codec::read_u16_le(data, LENGTH_OFFSET)?,
            checksum: codec::read_u16_le(data, crate::checksum::CHECKSUM_OFFSET)?,
            timestamp: Timestamp::new(
                codec::read_u32_le(data, SECONDS_OFFSET)?,
                codec::read_u32_le(data, NANOS_OFFSET)?,
            ),
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        let mut writer = FieldWriter::new(data);
        writer.put_u16(self.sync)?;
        writer.put_u8(self.packet_type)?;
        writer.put_u8(self.source_id)?;
        writer.put_u16(self.data_len)?;
        writer.put_u16(self.checksum)?;
        writer.put_u32(self.timestamp.nanos)?;
        writer.put_u32(self.timestamp.seconds)
    }

    /// Total packet length implied by the header.
    pub fn packet_len(&self) -> usize {
        TELEMETRY_HEADER_SIZE + self.data_len as usize
    }
}

/// Downlink telemetry packet with typed payload access and stream reassembly.
#[derive(Debug)]
pub struct TelemetryPacket {
    ctx: Arc<PacketContext>,
    buffer: PacketBuffer,
    state: PacketState,
    altered: bool,
    hunting: bool,
}

impl TelemetryPacket {
    /// Packet sized for the largest payload in the context's registry.
    pub fn new(ctx: Arc<PacketContext>) -> Self {
        let capacity = TELEMETRY_HEADER_SIZE + ctx.registry().max_payload_len();
        Self {
            ctx,
            buffer: PacketBuffer::new(capacity),
            state: PacketState::Reset,
            altered: false,
            hunting: false,
        }
    }

    pub fn context(&self) -> &Arc<PacketContext> {
        &self.ctx
    }

    pub fn state(&self) -> PacketState {
        self.state
    }

    pub fn is_reset(&self) -> bool {
        self.state == PacketState::Reset
    }

    /// Whether the contents changed since the checksum was last computed.
    pub fn is_altered(&self) -> bool {
        self.altered
    }

    /// Start an outbound packet of `packet_type`.
    ///
    /// The header gets the sync word, the context's source id, a zero payload
    /// length and the current time from the context clock.
    pub fn create(&mut self, packet_type: u8) -> Result<()> {
        self.ctx.registry().entry(packet_type)?;
        self.reset();

        let header = TelemetryHeader {
            sync: SYNC_WORD,
            packet_type,
            source_id: self.ctx.source_id(),
            data_len: 0,
            checksum: 0,
            timestamp: self.ctx.now(),
        };
        self.buffer.set_len(TELEMETRY_HEADER_SIZE)?;
        header.write_to(self.buffer.as_mut_slice())?;
        self.state = PacketState::Building;
        self.altered = true;
        trace!("Created telemetry packet type={:#04x}", packet_type);
        Ok(())
    }

    pub fn header(&self) -> Result<TelemetryHeader> {
        TelemetryHeader::parse(self.buffer.as_slice())
    }

    /// Telemetry type (0 when no header is present).
    pub fn packet_type(&self) -> u8 {
        self.header_byte(TYPE_OFFSET)
    }

    pub fn source_id(&self) -> u8 {
        self.header_byte(SOURCE_OFFSET)
    }

    /// Declared payload length in bytes.
    pub fn data_length(&self) -> usize {
        if self.buffer.len() < LENGTH_OFFSET + 2 {
            return 0;
        }
        self.buffer.read_word(LENGTH_OFFSET).map(usize::from).unwrap_or(0)
    }

    /// Notification tag of this packet's type.
    pub fn notification_tag(&self) -> Option<u32> {
        if self.buffer.len() <= TYPE_OFFSET {
            return None;
        }
        self.ctx.registry().lookup(self.packet_type()).map(|e| e.notification_tag)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.header().map(|h| h.timestamp).unwrap_or_default()
    }

    pub fn set_timestamp(&mut self, timestamp: Timestamp) -> Result<()> {
        self.require_output("set_timestamp")?;
        self.buffer.write_u32(NANOS_OFFSET, timestamp.nanos)?;
        self.buffer.write_u32(SECONDS_OFFSET, timestamp.seconds)?;
        self.mark_altered();
        Ok(())
    }

    /// The packet bytes, `[0, current_length)`.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// The payload bytes of a packet holding a header.
    pub fn payload_bytes(&self) -> &[u8] {
        let end = self.buffer.len().min(TELEMETRY_HEADER_SIZE + self.data_length());
        self.buffer.as_slice().get(TELEMETRY_HEADER_SIZE..end).unwrap_or(&[])
    }

    /// Replace the payload with raw bytes, checked against the type's schema.
    pub fn set_payload_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.require_output("set_payload_bytes")?;
        self.schema()?.check_length(bytes.len())?;
        self.resize_payload(bytes.len())?;
        self.buffer.write_bytes(TELEMETRY_HEADER_SIZE, bytes)?;
        self.mark_altered();
        Ok(())
    }

    /// Encode a typed payload into an outbound packet of the matching type.
    pub fn set_payload<T: TelemetryPayload>(&mut self, payload: &T) -> Result<()> {
        self.require_output("set_payload")?;
        self.require_type(T::PACKET_TYPE)?;
        let len = payload.encoded_len();
        self.schema()?.check_length(len)?;
        if TELEMETRY_HEADER_SIZE + len > self.buffer.capacity() {
            return Err(PacketError::BufferFull {
                requested: len,
                available: self.buffer.capacity() - TELEMETRY_HEADER_SIZE,
            });
        }

        self.resize_payload(len)?;
        let mut writer = FieldWriter::new(&mut self.buffer.as_mut_slice()[TELEMETRY_HEADER_SIZE..]);
        payload.encode(&mut writer)?;
        if writer.written() != len {
            return Err(PacketError::payload_error(
                format!("type {:#04x}", T::PACKET_TYPE),
                format!("encoded {} bytes, declared {}", writer.written(), len),
            ));
        }
        self.mark_altered();
        Ok(())
    }

    /// Decode the payload as `T`, checking the type and the schema length.
    ///
    /// Only a completed packet or one being built can be read; a packet still
    /// receiving has not had its checksum verified.
    pub fn payload<T: TelemetryPayload>(&self) -> Result<T> {
        self.require_output("payload")?;
        self.require_type(T::PACKET_TYPE)?;
        let bytes = self.payload_bytes();
        self.schema()?.check_length(bytes.len())?;
        T::decode(&mut FieldReader::new(bytes))
    }

    /// Compute and store the checksum over the current contents.
    pub fn set_checksum(&mut self) -> Result<u16> {
        let engine = *self.ctx.checksum();
        let sum = engine
            .seal(self.buffer.as_mut_slice())
            .ok_or(PacketError::NotReady { operation: "set_checksum" })?;
        self.altered = false;
        Ok(sum)
    }

    /// Whether the stored checksum matches the contents. Never modifies the packet.
    pub fn verify_checksum(&self) -> bool {
        matches!(self.ctx.checksum().verify(self.buffer.as_slice()), Some((stored, computed)) if stored == computed)
    }

    /// Finish an outbound packet: check the payload length against the schema
    /// and recompute the checksum if anything changed.
    pub fn finalize_output_packet(&mut self) -> Result<&[u8]> {
        match self.state {
            PacketState::Building | PacketState::Completed => {
                self.schema()?.check_length(self.data_length())?;
                if self.altered {
                    let checksum = self.set_checksum()?;
                    debug!(
                        "Finalized telemetry packet type={:#04x} len={} checksum={:#06x}",
                        self.packet_type(),
                        self.data_length(),
                        checksum
                    );
                }
                self.state = PacketState::Completed;
                Ok(self.buffer.as_slice())
            }
            _ => Err(PacketError::NotReady { operation: "finalize_output_packet" }),
        }
    }

    /// Finalize if needed and hand the packet to `transport`.
    pub fn send_output_packet<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        timeout: Duration,
    ) -> Result<()> {
        let bytes = self.finalize_output_packet()?;
        transport::send_all(transport, bytes, timeout)
    }

    /// Check that `buffer` holds exactly one valid packet. Nothing is copied.
    pub fn verify_buffer(&self, buffer: &[u8]) -> Result<TelemetryHeader> {
        let header = TelemetryHeader::parse(buffer)?;
        if header.sync != SYNC_WORD {
            let position = if buffer[0] != SYNC_BYTES[0] { 0 } else { 1 };
            return Err(PacketError::NoSync { position, found: buffer[position] });
        }
        self.ctx.registry().check_length(header.packet_type, header.data_len as usize)?;
        if buffer.len() != header.packet_len() {
            return Err(PacketError::Length {
                declared: header.data_len as usize,
                limit: buffer.len() - TELEMETRY_HEADER_SIZE,
            });
        }
        let computed = self.ctx.checksum().packet_checksum(buffer);
        if computed != header.checksum {
            return Err(PacketError::Checksum { expected: header.checksum, computed });
        }
        Ok(header)
    }

    /// Verify `buffer` and, only if it is valid, copy it into this packet.
    pub fn load_buffer(&mut self, buffer: &[u8]) -> Result<()> {
        self.verify_buffer(buffer)?;
        self.reset();
        self.buffer.fill_from(buffer)?;
        self.state = PacketState::Completed;
        Ok(())
    }

    /// Reformat this packet as an `ERROR` packet describing `error`.
    ///
    /// Any packet in progress is dropped. At most four `context` words are kept.
    /// Returns false if the registry has no `ERROR` type.
    pub fn handle_error(&mut self, error: &PacketError, context: &[u32]) -> bool {
        warn!("Reporting error {:#06x}: {}", error.code(), error);
        let report = ErrorReport::new(error.code(), context);
        let built = self
            .create(packet_type::ERROR)
            .and_then(|_| self.set_payload(&report))
            .and_then(|_| self.finalize_output_packet().map(|_| ()));
        match built {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot build ERROR packet: {}", e);
                self.reset();
                false
            }
        }
    }

    /// Immutable copy of a completed packet for sharing across tasks.
    pub fn snapshot(&self) -> Result<ReceivedPacket> {
        if self.state != PacketState::Completed {
            return Err(PacketError::NotReady { operation: "snapshot" });
        }
        let header = self.header()?;
        let tag = self.notification_tag().unwrap_or(0);
        Ok(ReceivedPacket::new(self.buffer.as_slice().to_vec(), header, tag))
    }

    fn schema(&self) -> Result<&TypeSchemaEntry> {
        self.ctx.registry().entry(self.packet_type())
    }

    fn require_output(&self, operation: &'static str) -> Result<()> {
        match self.state {
            PacketState::Building | PacketState::Completed => Ok(()),
            _ => Err(PacketError::NotReady { operation }),
        }
    }

    fn require_type(&self, expected: u8) -> Result<()> {
        let found = self.packet_type();
        if found != expected {
            return Err(PacketError::TypeMismatch { expected, found });
        }
        Ok(())
    }

    fn resize_payload(&mut self, len: usize) -> Result<()> {
        self.buffer.set_len(TELEMETRY_HEADER_SIZE + len)?;
        self.buffer.write_word(LENGTH_OFFSET, len as u16)
    }

    fn mark_altered(&mut self) {
        self.altered = true;
        self.state = PacketState::Building;
    }

    fn header_byte(&self, offset: usize) -> u8 {
        if self.buffer.len() > offset { self.buffer.read_u8(offset).unwrap_or(0) } else { 0 }
    }

    fn reject(&mut self, error: PacketError, consumed: bool) -> ScanStep {
        debug!("Telemetry packet rejected: {}", error);
        self.reset();
        ScanStep::Rejected { error, consumed }
    }

    /// Reject a header and rescan everything after the first sync byte, plus
    /// `unstored` when the offending byte was not pushed.
    fn reject_header(&mut self, error: PacketError, unstored: Option<u8>) -> ScanStep {
        let mut tail = [0u8; TELEMETRY_HEADER_SIZE];
        let mut count = 0;
        for (slot, &b) in tail.iter_mut().zip(self.buffer.as_slice().iter().skip(1).chain(unstored.iter())) {
            *slot = b;
            count += 1;
        }
        let step = self.reject(error, true);
        framing::rescan(self, &tail[..count]);
        step
    }
}

impl Reassemble for TelemetryPacket {
    fn scan_byte(&mut self, byte: u8) -> ScanStep {
        if matches!(self.state, PacketState::Completed | PacketState::Building) {
            self.reset();
        }

        match self.buffer.len() {
            0 => {
                if byte != SYNC_BYTES[0] {
                    let run_start = !self.hunting;
                    self.hunting = true;
                    return ScanStep::Discarded { run_start };
                }
                self.hunting = false;
                self.state = PacketState::Receiving;
            }
            1 => {
                if byte != SYNC_BYTES[1] {
                    return self.reject(PacketError::NoSync { position: 1, found: byte }, false);
                }
            }
            TYPE_OFFSET => {
                if !self.ctx.registry().contains(byte) {
                    return self.reject_header(PacketError::UnknownType { packet_type: byte }, Some(byte));
                }
            }
            _ => {}
        }

        if let Err(error) = self.buffer.push(byte) {
            return self.reject(error, true);
        }

        let len = self.buffer.len();
        if len == LENGTH_OFFSET + 2 {
            let declared = self.data_length();
            if let Err(error) = self.ctx.registry().check_length(self.packet_type(), declared) {
                return self.reject_header(error, None);
            }
        }
        if len < TELEMETRY_HEADER_SIZE || len < TELEMETRY_HEADER_SIZE + self.data_length() {
            return ScanStep::Accepted;
        }

        let Some((stored, computed)) = self.ctx.checksum().verify(self.buffer.as_slice()) else {
            return ScanStep::Accepted;
        };
        if stored != computed {
            return self.reject(PacketError::Checksum { expected: stored, computed }, true);
        }

        self.state = PacketState::Completed;
        self.altered = false;
        debug!(
            "Received telemetry packet type={:#04x} source={:#04x} len={}",
            self.packet_type(),
            self.source_id(),
            self.data_length()
        );
        ScanStep::Complete
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = PacketState::Reset;
        self.altered = false;
        self.hunting = false;
    }

    fn is_completed(&self) -> bool {
        self.state == PacketState::Completed
    }
}
