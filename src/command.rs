//! Uplink command packets.
//!
//! A command packet is a small fixed header followed by a sequence of 16-bit words:
//!
//! ```text
//! offset  size  field
//!      0     2  sync word 0xC39A (9A C3 on the wire)
//!      2     1  target CPU id
//!      3     1  payload length in bytes
//!      4     2  sequence id
//!      6     2  checksum
//!      8     n  payload words, little-endian
//! ```
//!
//! Command codes and their word counts are interpreted by the receiving subsystem;
//! the packet itself only frames an opaque word sequence.
//!
//! ```rust
//! use gondola::{CommandPacket, PacketContext};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(PacketContext::new(0x01));
//! let mut packet = CommandPacket::new(Arc::clone(&ctx));
//! packet.reset_output_packet();
//! packet.set_target_id(0x02)?;
//! packet.add_word(0x00AA)?;
//! packet.add_word(0x5500)?;
//! let bytes = packet.finalize_output_packet()?.to_vec();
//! assert_eq!(&bytes[..4], &[0x9A, 0xC3, 0x02, 0x04]);
//! assert_eq!(&bytes[8..], &[0xAA, 0x00, 0x00, 0x55]);
//!
//! let mut received = CommandPacket::new(ctx);
//! received.check_buffer(&bytes)?;
//! assert_eq!(received.get_word()?, 0x00AA);
//! # Ok::<(), gondola::PacketError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::buffer::PacketBuffer;
use crate::framing::{self, PacketState, Reassemble, SYNC_BYTES, SYNC_WORD, ScanStep};
use crate::transport::{self, Transport};
use crate::{PacketContext, PacketError, Result, codec};

/// Size of the command header in bytes.
pub const COMMAND_HEADER_SIZE: usize = 8;

/// Default bound on the payload length byte (exclusive).
pub const DEFAULT_MAX_COMMAND_PAYLOAD: usize = 128;

/// Largest bound the one-byte length field can express.
pub const MAX_COMMAND_PAYLOAD_LIMIT: usize = 256;

const TARGET_OFFSET: usize = 2;
const LENGTH_OFFSET: usize = 3;
const SEQUENCE_OFFSET: usize = 4;

/// Decoded command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub sync: u16,
    pub target_id: u8,
    pub payload_len: u8,
    pub sequence_id: u16,
    pub checksum: u16,
}

impl CommandHeader {
    pub const SIZE: usize = COMMAND_HEADER_SIZE;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(PacketError::EndOfPacket { requested: Self::SIZE, remaining: data.len() });
        }
        Ok(Self {
            sync: codec::read_u16_le(data, 0)?,
            target_id: data[TARGET_OFFSET],
            payload_len: data[LENGTH_OFFSET],
            sequence_id: codec::read_u16_le(data, SEQUENCE_OFFSET)?,
            checksum: codec::read_u16_le(data, crate::checksum::CHECKSUM_OFFSET)?,
        })
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        codec::write_u16_le(data, 0, self.sync)?;
        let available = data.len();
        let fields = data.get_mut(TARGET_OFFSET..=LENGTH_OFFSET).ok_or(
            PacketError::BufferFull { requested: Self::SIZE, available },
        )?;
        fields[0] = self.target_id;
        fields[1] = self.payload_len;
        codec::write_u16_le(data, SEQUENCE_OFFSET, self.sequence_id)?;
        codec::write_u16_le(data, crate::checksum::CHECKSUM_OFFSET, self.checksum)
    }
}

/// Uplink command packet with word cursors and stream reassembly.
#[derive(Debug)]
pub struct CommandPacket {
    ctx: Arc<PacketContext>,
    buffer: PacketBuffer,
    max_payload: usize,
    read_index: usize,
    write_index: usize,
    state: PacketState,
    hunting: bool,
}

impl CommandPacket {
    /// Packet bounded by the context's command payload limit.
    pub fn new(ctx: Arc<PacketContext>) -> Self {
        let max_payload = ctx.command_max_payload();
        Self::with_max_payload(ctx, max_payload)
    }

    /// Packet accepting payload lengths strictly below `max_payload`
    /// (clamped to `1..=256`).
    pub fn with_max_payload(ctx: Arc<PacketContext>, max_payload: usize) -> Self {
        let max_payload = max_payload.clamp(1, MAX_COMMAND_PAYLOAD_LIMIT);
        Self {
            ctx,
            buffer: PacketBuffer::new(COMMAND_HEADER_SIZE + max_payload - 1),
            max_payload,
            read_index: 0,
            write_index: 0,
            state: PacketState::Reset,
            hunting: false,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn state(&self) -> PacketState {
        self.state
    }

    pub fn is_reset(&self) -> bool {
        self.state == PacketState::Reset
    }

    /// Start building a new outbound packet with the next sequence id.
    pub fn reset_output_packet(&mut self) {
        self.reset();
        let header = CommandHeader {
            sync: SYNC_WORD,
            target_id: 0,
            payload_len: 0,
            sequence_id: self.ctx.next_sequence(),
            checksum: 0,
        };
        let written = self
            .buffer
            .set_len(COMMAND_HEADER_SIZE)
            .and_then(|_| header.write_to(self.buffer.as_mut_slice()));
        debug_assert!(written.is_ok(), "command arena holds at least a header: {written:?}");
        self.state = PacketState::Building;
        trace!("Building command packet seq={}", header.sequence_id);
    }

    pub fn set_target_id(&mut self, target_id: u8) -> Result<()> {
        self.require(PacketState::Building, "set_target_id")?;
        self.buffer.write_u8(TARGET_OFFSET, target_id)
    }

    /// Target CPU id of the packet (0 when no header is present).
    pub fn cpu_id(&self) -> u8 {
        self.header_byte(TARGET_OFFSET)
    }

    pub fn target_id(&self) -> u8 {
        self.cpu_id()
    }

    pub fn sequence_number(&self) -> u16 {
        if self.buffer.len() < COMMAND_HEADER_SIZE {
            return 0;
        }
        self.buffer.read_word(SEQUENCE_OFFSET).unwrap_or(0)
    }

    /// Declared payload length in bytes.
    pub fn payload_length(&self) -> usize {
        self.header_byte(LENGTH_OFFSET) as usize
    }

    /// Number of whole payload words.
    pub fn word_count(&self) -> usize {
        self.payload_length() / 2
    }

    /// Words read so far with [`get_word`](Self::get_word).
    pub fn read_index(&self) -> usize {
        self.read_index
    }

    /// Words appended so far with [`add_word`](Self::add_word).
    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn header(&self) -> Result<CommandHeader> {
        CommandHeader::parse(self.buffer.as_slice())
    }

    /// The packet bytes, `[0, current_length)`.
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Append one word to an outbound packet.
    pub fn add_word(&mut self, value: u16) -> Result<()> {
        self.require(PacketState::Building, "add_word")?;
        self.buffer.ensure_write_space(2)?;
        self.push_word(value)
    }

    /// Append an `f32` as two words.
    pub fn add_float(&mut self, value: f32) -> Result<()> {
        self.require(PacketState::Building, "add_float")?;
        self.buffer.ensure_write_space(4)?;
        self.write_float(value)
    }

    /// Append an `f64` as four words.
    pub fn add_double(&mut self, value: f64) -> Result<()> {
        self.require(PacketState::Building, "add_double")?;
        self.buffer.ensure_write_space(8)?;
        self.write_double(value)
    }

    /// Read the next payload word of a completed packet.
    pub fn get_word(&mut self) -> Result<u16> {
        let value = self.peek_word()?;
        self.read_index += 1;
        Ok(value)
    }

    /// Read the next payload word without advancing the cursor.
    pub fn peek_word(&self) -> Result<u16> {
        self.require(PacketState::Completed, "peek_word")?;
        let offset = self.read_offset();
        self.buffer.ensure_read_space(offset, 2, self.payload_end())?;
        self.buffer.read_word(offset)
    }

    pub fn get_float(&mut self) -> Result<f32> {
        self.require(PacketState::Completed, "get_float")?;
        self.buffer.ensure_read_space(self.read_offset(), 4, self.payload_end())?;
        Ok(self.read_float())
    }

    pub fn get_double(&mut self) -> Result<f64> {
        self.require(PacketState::Completed, "get_double")?;
        self.buffer.ensure_read_space(self.read_offset(), 8, self.payload_end())?;
        Ok(self.read_double())
    }

    /// Move the read cursor back to the first payload word.
    pub fn rewind(&mut self) {
        self.read_index = 0;
    }

    // Multi-word helpers: space has been validated by the caller.

    fn write_float(&mut self, value: f32) -> Result<()> {
        let bits = value.to_bits();
        self.push_word(bits as u16)?;
        self.push_word((bits >> 16) as u16)
    }

    fn write_double(&mut self, value: f64) -> Result<()> {
        let bits = value.to_bits();
        for shift in [0, 16, 32, 48] {
            self.push_word((bits >> shift) as u16)?;
        }
        Ok(())
    }

    fn read_float(&mut self) -> f32 {
        let low = self.next_word_unchecked() as u32;
        let high = self.next_word_unchecked() as u32;
        f32::from_bits(low | (high << 16))
    }

    fn read_double(&mut self) -> f64 {
        let mut bits = 0u64;
        for shift in [0, 16, 32, 48] {
            bits |= (self.next_word_unchecked() as u64) << shift;
        }
        f64::from_bits(bits)
    }

    fn next_word_unchecked(&mut self) -> u16 {
        let value = self.buffer.read_word(self.read_offset()).unwrap_or(0);
        self.read_index += 1;
        value
    }

    fn push_word(&mut self, value: u16) -> Result<()> {
        self.buffer.extend_from_slice(&value.to_le_bytes())?;
        self.write_index += 1;
        let payload_len = (self.buffer.len() - COMMAND_HEADER_SIZE) as u8;
        self.buffer.write_u8(LENGTH_OFFSET, payload_len)
    }

    /// Compute and store the checksum over the current contents.
    pub fn set_checksum(&mut self) -> Result<u16> {
        let engine = *self.ctx.checksum();
        engine.seal(self.buffer.as_mut_slice()).ok_or(PacketError::NotReady { operation: "set_checksum" })
    }

    /// Whether the stored checksum matches the contents. Never modifies the packet.
    pub fn verify_checksum(&self) -> bool {
        matches!(self.ctx.checksum().verify(self.buffer.as_slice()), Some((stored, computed)) if stored == computed)
    }

    /// Finish an outbound packet: fix the length byte and store the checksum.
    ///
    /// The packet becomes `Completed` and can be read back or sent.
    pub fn finalize_output_packet(&mut self) -> Result<&[u8]> {
        match self.state {
            PacketState::Building => {
                let payload_len = self.buffer.len() - COMMAND_HEADER_SIZE;
                if payload_len >= self.max_payload {
                    return Err(PacketError::Length { declared: payload_len, limit: self.max_payload });
                }
                self.buffer.write_u8(LENGTH_OFFSET, payload_len as u8)?;
                let checksum = self.set_checksum()?;
                self.state = PacketState::Completed;
                self.read_index = 0;
                debug!(
                    "Finalized command packet target={:#04x} seq={} len={} checksum={:#06x}",
                    self.cpu_id(),
                    self.sequence_number(),
                    payload_len,
                    checksum
                );
                Ok(self.buffer.as_slice())
            }
            PacketState::Completed => Ok(self.buffer.as_slice()),
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

    /// Validate a complete packet supplied by the caller and, only if it is valid,
    /// copy it into this packet.
    pub fn check_buffer(&mut self, buffer: &[u8]) -> Result<()> {
        let header = CommandHeader::parse(buffer)?;
        if header.sync != SYNC_WORD {
            let position = if buffer[0] != SYNC_BYTES[0] { 0 } else { 1 };
            return Err(PacketError::NoSync { position, found: buffer[position] });
        }

        let payload_len = header.payload_len as usize;
        if payload_len >= self.max_payload {
            return Err(PacketError::Length { declared: payload_len, limit: self.max_payload });
        }
        if buffer.len() != COMMAND_HEADER_SIZE + payload_len {
            return Err(PacketError::Length {
                declared: payload_len,
                limit: buffer.len().saturating_sub(COMMAND_HEADER_SIZE),
            });
        }

        let computed = self.ctx.checksum().packet_checksum(buffer);
        if computed != header.checksum {
            return Err(PacketError::Checksum { expected: header.checksum, computed });
        }

        self.reset();
        self.buffer.fill_from(buffer)?;
        self.state = PacketState::Completed;
        Ok(())
    }

    fn require(&self, state: PacketState, operation: &'static str) -> Result<()> {
        if self.state == state { Ok(()) } else { Err(PacketError::NotReady { operation }) }
    }

    fn header_byte(&self, offset: usize) -> u8 {
        if self.buffer.len() > offset { self.buffer.read_u8(offset).unwrap_or(0) } else { 0 }
    }

    fn read_offset(&self) -> usize {
        COMMAND_HEADER_SIZE + self.read_index * 2
    }

    fn payload_end(&self) -> usize {
        COMMAND_HEADER_SIZE + self.payload_length()
    }

    fn reject(&mut self, error: PacketError, consumed: bool) -> ScanStep {
        debug!("Command packet rejected: {}", error);
        self.reset();
        ScanStep::Rejected { error, consumed }
    }

    /// Reject a header at `byte` (not yet stored) and rescan everything after the
    /// first sync byte, which may hold the start of the next packet.
    fn reject_header(&mut self, error: PacketError, byte: u8) -> ScanStep {
        let mut tail = [0u8; COMMAND_HEADER_SIZE];
        let mut count = 0;
        for (slot, &b) in tail.iter_mut().zip(self.buffer.as_slice().iter().skip(1).chain([byte].iter())) {
            *slot = b;
            count += 1;
        }
        let step = self.reject(error, true);
        framing::rescan(self, &tail[..count]);
        step
    }
}

impl Reassemble for CommandPacket {
    fn scan_byte(&mut self, byte: u8) -> ScanStep {
        if matches!(self.state, PacketState::Completed | PacketState::Building) {
            self.reset();
        }

        let position = self.buffer.len();
        match position {
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
            LENGTH_OFFSET => {
                if byte as usize >= self.max_payload {
                    return self.reject_header(
                        PacketError::Length { declared: byte as usize, limit: self.max_payload },
                        byte,
                    );
                }
            }
            _ => {}
        }

        if let Err(error) = self.buffer.push(byte) {
            return self.reject(error, true);
        }

        let len = self.buffer.len();
        if len < COMMAND_HEADER_SIZE || len < self.payload_end() {
            return ScanStep::Accepted;
        }

        let (stored, computed) = match self.ctx.checksum().verify(self.buffer.as_slice()) {
            Some(sums) => sums,
            None => return ScanStep::Accepted,
        };
        if stored != computed {
            return self.reject(PacketError::Checksum { expected: stored, computed }, true);
        }

        self.state = PacketState::Completed;
        self.read_index = 0;
        self.write_index = self.word_count();
        debug!(
            "Received command packet target={:#04x} seq={} len={}",
            self.cpu_id(),
            self.sequence_number(),
            self.payload_length()
        );
        ScanStep::Complete
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.read_index = 0;
        self.write_index = 0;
        self.state = PacketState::Reset;
        self.hunting = false;
    }

    fn is_completed(&self) -> bool {
        self.state == PacketState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumEngine;
    use crate::framing::Progress;
    use crate::test_utils::{command_bytes, noise_with_sync_fragment, test_context};
    use proptest::prelude::*;

    fn output_packet(target: u8, words: &[u16]) -> CommandPacket {
        let mut packet = CommandPacket::new(test_context());
        packet.reset_output_packet();
        packet.set_target_id(target).unwrap();
        for &word in words {
            packet.add_word(word).unwrap();
        }
        packet
    }

    #[test]
    fn serializes_the_documented_layout() {
        let ctx = test_context();
        let mut packet = CommandPacket::new(Arc::clone(&ctx));
        packet.reset_output_packet();
        packet.set_target_id(0x02).unwrap();
        packet.add_word(0x00AA).unwrap();
        packet.add_word(0x5500).unwrap();
        let seq = packet.sequence_number();
        let bytes = packet.finalize_output_packet().unwrap().to_vec();

        let [seq_lo, seq_hi] = seq.to_le_bytes();
        assert_eq!(&bytes[..6], &[0x9A, 0xC3, 0x02, 0x04, seq_lo, seq_hi]);
        assert_eq!(&bytes[8..], &[0xAA, 0x00, 0x00, 0x55]);
        let checksum = u16::from_le_bytes([bytes[6], bytes[7]]);
        assert_eq!(checksum, ctx.checksum().packet_checksum(&bytes));

        let mut parsed = CommandPacket::new(ctx);
        let mut cursor = 0;
        assert_eq!(parsed.process_buffer(&bytes, &mut cursor).unwrap(), Progress::Complete);
        assert_eq!(cursor, bytes.len());
        assert_eq!(parsed.cpu_id(), 0x02);
        assert_eq!(parsed.word_count(), 2);
        assert_eq!(parsed.peek_word().unwrap(), 0x00AA);
        assert_eq!(parsed.get_word().unwrap(), 0x00AA);
        assert_eq!(parsed.get_word().unwrap(), 0x5500);
        assert!(matches!(parsed.get_word(), Err(PacketError::EndOfPacket { .. })));
    }

    #[test]
    fn sequence_ids_increase_per_output_packet() {
        let mut packet = CommandPacket::new(test_context());
        packet.reset_output_packet();
        let first = packet.sequence_number();
        packet.reset_output_packet();
        assert_eq!(packet.sequence_number(), first.wrapping_add(1));
    }

    #[test]
    fn add_word_stops_at_capacity() {
        let mut packet = CommandPacket::with_max_payload(test_context(), 8);
        packet.reset_output_packet();
        for word in 0..3 {
            packet.add_word(word).unwrap();
        }
        // 6 bytes used, 7 is the largest valid length
        assert!(matches!(packet.add_word(3), Err(PacketError::BufferFull { .. })));

        let mut odd = CommandPacket::with_max_payload(test_context(), 8);
        odd.reset_output_packet();
        odd.buffer.push(0).unwrap();
        odd.add_word(1).unwrap();
        odd.add_word(2).unwrap();
        odd.add_word(3).unwrap();
        assert_eq!(odd.as_bytes().len() - COMMAND_HEADER_SIZE, 7);
        let before = odd.as_bytes().to_vec();
        assert!(matches!(odd.add_word(4), Err(PacketError::BufferFull { .. })));
        assert_eq!(odd.as_bytes(), before.as_slice());
    }

    #[test]
    fn floats_and_doubles_use_consecutive_words() {
        let mut packet = output_packet(0x03, &[]);
        packet.add_float(1.5).unwrap();
        packet.add_double(-2.25).unwrap();
        let bytes = packet.finalize_output_packet().unwrap().to_vec();
        assert_eq!(&bytes[8..12], &1.5f32.to_le_bytes());
        assert_eq!(&bytes[12..20], &(-2.25f64).to_le_bytes());

        let mut parsed = CommandPacket::new(test_context());
        parsed.check_buffer(&bytes).unwrap();
        assert_eq!(parsed.word_count(), 6);
        assert_eq!(parsed.get_float().unwrap(), 1.5);
        assert_eq!(parsed.get_double().unwrap(), -2.25);
        assert!(matches!(parsed.get_float(), Err(PacketError::EndOfPacket { .. })));
    }

    #[test]
    fn reads_require_a_completed_packet() {
        let mut packet = CommandPacket::new(test_context());
        assert!(matches!(packet.get_word(), Err(PacketError::NotReady { .. })));
        assert!(matches!(packet.add_word(1), Err(PacketError::NotReady { .. })));
        assert!(matches!(packet.set_target_id(1), Err(PacketError::NotReady { .. })));
        assert!(matches!(packet.finalize_output_packet(), Err(PacketError::NotReady { .. })));

        packet.reset_output_packet();
        packet.add_word(1).unwrap();
        assert!(matches!(packet.get_word(), Err(PacketError::NotReady { .. })));
    }

    #[test]
    fn checksum_invariant_holds() {
        let mut packet = output_packet(0x01, &[1, 2, 3]);
        packet.finalize_output_packet().unwrap();
        assert!(packet.verify_checksum());

        packet.buffer.as_mut_slice()[9] ^= 0x40;
        assert!(!packet.verify_checksum());
        // Verification leaves the stored checksum alone
        let stored = ChecksumEngine::stored_checksum(packet.as_bytes());
        assert!(!packet.verify_checksum());
        assert_eq!(ChecksumEngine::stored_checksum(packet.as_bytes()), stored);
    }

    #[test]
    fn check_buffer_rejects_without_committing() {
        let bytes = command_bytes(0x02, &[0x1111, 0x2222]);
        let mut packet = CommandPacket::new(test_context());
        packet.check_buffer(&bytes).unwrap();
        assert!(packet.is_completed());

        let mut corrupted = bytes.clone();
        corrupted[9] ^= 0xFF;
        let mut other = CommandPacket::new(test_context());
        assert!(matches!(other.check_buffer(&corrupted), Err(PacketError::Checksum { .. })));
        assert!(other.is_reset());

        let mut bad_sync = bytes.clone();
        bad_sync[1] = 0x00;
        assert!(matches!(
            other.check_buffer(&bad_sync),
            Err(PacketError::NoSync { position: 1, found: 0 })
        ));

        assert!(matches!(other.check_buffer(&bytes[..10]), Err(PacketError::Length { .. })));
        assert!(matches!(other.check_buffer(&bytes[..4]), Err(PacketError::EndOfPacket { .. })));
    }

    #[test]
    fn length_byte_at_limit_is_rejected() {
        let mut packet = CommandPacket::with_max_payload(test_context(), 16);
        let input = [0x9A, 0xC3, 0x01, 16, 0, 0, 0, 0];
        let mut cursor = 0;
        let result = packet.process_buffer(&input, &mut cursor);
        assert!(matches!(result, Err(PacketError::Length { declared: 16, limit: 16 })));
        assert_eq!(cursor, 4);
        assert!(packet.is_reset());
    }

    #[test]
    fn zero_length_packets_are_valid() {
        let bytes = command_bytes(0x05, &[]);
        assert_eq!(bytes.len(), COMMAND_HEADER_SIZE);
        let mut packet = CommandPacket::new(test_context());
        let mut cursor = 0;
        let mut errors = 0;
        assert!(packet.process_input(&bytes, &mut cursor, &mut errors));
        assert_eq!(errors, 0);
        assert_eq!(packet.word_count(), 0);
    }

    #[test]
    fn bad_second_sync_byte_is_rescanned() {
        let bytes = command_bytes(0x02, &[0xBEEF]);
        let mut input = vec![0x9A];
        input.extend_from_slice(&bytes);

        let mut packet = CommandPacket::new(test_context());
        let mut cursor = 0;
        let result = packet.process_buffer(&input, &mut cursor);
        assert!(matches!(result, Err(PacketError::NoSync { position: 1, found: 0x9A })));
        assert_eq!(cursor, 1);

        assert_eq!(packet.process_buffer(&input, &mut cursor).unwrap(), Progress::Complete);
        assert_eq!(packet.get_word().unwrap(), 0xBEEF);
    }

    #[test]
    fn corrupted_checksum_resets_and_counts() {
        let mut bytes = command_bytes(0x02, &[1, 2]);
        bytes[10] ^= 0x01;
        let mut packet = CommandPacket::new(test_context());
        let mut cursor = 0;
        let mut errors = 0;
        assert!(!packet.process_input(&bytes, &mut cursor, &mut errors));
        assert_eq!(cursor, bytes.len());
        assert_eq!(errors, 1);
        assert!(packet.is_reset());
    }

    #[test]
    fn send_output_packet_finalizes() {
        let mut transport = crate::transport::LoopbackTransport::new();
        let mut packet = output_packet(0x04, &[7, 8, 9]);
        packet.send_output_packet(&mut transport, Duration::from_millis(10)).unwrap();
        assert_eq!(transport.sent(), packet.as_bytes());
        assert!(packet.verify_checksum());
    }

    #[test]
    fn sync_fragment_before_a_packet_is_rescanned() {
        let bytes = command_bytes(0x02, &[0x00AA, 0x5500]);
        let mut input = vec![0x9A, 0xC3];
        input.extend_from_slice(&bytes);

        let mut packet = CommandPacket::new(test_context());
        let mut cursor = 0;
        let result = packet.process_buffer(&input, &mut cursor);
        // The real sync word lands in the target and length bytes
        assert!(matches!(result, Err(PacketError::Length { declared: 0xC3, limit: 128 })));
        assert_eq!(cursor, 4);
        assert_eq!(packet.state(), PacketState::Receiving);

        assert_eq!(packet.process_buffer(&input, &mut cursor).unwrap(), Progress::Complete);
        assert_eq!(cursor, input.len());
        assert_eq!(packet.as_bytes(), bytes.as_slice());
        assert_eq!(packet.target_id(), 0x02);
    }

    #[test]
    fn reset_output_packet_fits_the_smallest_arena() {
        let mut packet = CommandPacket::with_max_payload(test_context(), 1);
        packet.reset_output_packet();
        assert_eq!(packet.state(), PacketState::Building);
        assert_eq!(packet.as_bytes().len(), COMMAND_HEADER_SIZE);
        assert_eq!(&packet.as_bytes()[..2], &SYNC_BYTES);
        assert!(matches!(packet.add_word(1), Err(PacketError::BufferFull { .. })));
        assert_eq!(packet.finalize_output_packet().unwrap().len(), COMMAND_HEADER_SIZE);
    }

    proptest! {
        #[test]
        fn split_reads_rebuild_the_same_packet(
            target in any::<u8>(),
            words in prop::collection::vec(any::<u16>(), 0..40),
            split in any::<prop::sample::Index>(),
        ) {
            let bytes = command_bytes(target, &words);
            let split = split.index(bytes.len() + 1);

            let mut whole = CommandPacket::new(test_context());
            let mut cursor = 0;
            let mut errors = 0;
            prop_assert!(whole.process_input(&bytes, &mut cursor, &mut errors));

            let mut halves = CommandPacket::new(test_context());
            let (first, second) = bytes.split_at(split);
            let mut cursor = 0;
            let done_early = halves.process_input(first, &mut cursor, &mut errors);
            prop_assert_eq!(done_early, split == bytes.len());
            if !done_early {
                let mut cursor = 0;
                prop_assert!(halves.process_input(second, &mut cursor, &mut errors));
                prop_assert_eq!(cursor, second.len());
            }

            prop_assert_eq!(errors, 0);
            prop_assert_eq!(whole.as_bytes(), halves.as_bytes());
            prop_assert_eq!(halves.cpu_id(), target);
            for &word in &words {
                prop_assert_eq!(halves.get_word().unwrap(), word);
            }
        }

        #[test]
        fn noise_and_truncated_header_are_skipped(
            garbage in noise_with_sync_fragment(0..48),
            words in prop::collection::vec(any::<u16>(), 1..16),
        ) {
            let bytes = command_bytes(0x07, &words);
            let mut input = garbage;
            input.extend_from_slice(&bytes);

            let mut packet = CommandPacket::new(test_context());
            let mut cursor = 0;
            let mut errors = 0;
            prop_assert!(packet.process_input(&input, &mut cursor, &mut errors));
            prop_assert_eq!(cursor, input.len());
            prop_assert!(errors >= 1);
            prop_assert_eq!(packet.as_bytes(), bytes.as_slice());
        }
    }
}
