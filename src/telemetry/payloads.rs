//! Typed views of telemetry payloads.
//!
//! Each telemetry category has one payload struct implementing [`TelemetryPayload`].
//! Fields hold raw wire values (ADC counts, raw temperatures); conversion to
//! engineering units belongs to the consumer.

use serde::{Deserialize, Serialize};

use crate::codec::{FieldReader, FieldWriter};
use crate::registry::packet_type;
use crate::{PacketError, Result};

/// A payload layout bound to one telemetry type code.
pub trait TelemetryPayload: Sized {
    /// Type code carried in the telemetry header.
    const PACKET_TYPE: u8;

    /// Number of payload bytes [`encode`](Self::encode) writes.
    fn encoded_len(&self) -> usize;

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()>;

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self>;
}

/// Maximum number of context words in an [`ErrorReport`].
pub const MAX_ERROR_CONTEXT: usize = 4;

/// ERROR: a wire error code plus up to four context words.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: u16,
    pub context: Vec<u32>,
}

impl ErrorReport {
    /// Report for `code`, keeping at most [`MAX_ERROR_CONTEXT`] context words.
    pub fn new(code: u16, context: &[u32]) -> Self {
        let kept = context.len().min(MAX_ERROR_CONTEXT);
        Self { code, context: context[..kept].to_vec() }
    }
}

impl TelemetryPayload for ErrorReport {
    const PACKET_TYPE: u8 = packet_type::ERROR;

    fn encoded_len(&self) -> usize {
        4 + 4 * self.context.len()
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        if self.context.len() > MAX_ERROR_CONTEXT {
            return Err(PacketError::payload_error(
                "ERROR",
                format!("{} context words (max {})", self.context.len(), MAX_ERROR_CONTEXT),
            ));
        }
        writer.put_u16(self.code)?;
        writer.put_u16(self.context.len() as u16)?;
        for &word in &self.context {
            writer.put_u32(word)?;
        }
        Ok(())
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let code = reader.u16()?;
        let count = reader.u16()? as usize;
        if count > MAX_ERROR_CONTEXT {
            return Err(PacketError::payload_error(
                "ERROR",
                format!("{} context words (max {})", count, MAX_ERROR_CONTEXT),
            ));
        }
        let context = (0..count).map(|_| reader.u32()).collect::<Result<Vec<_>>>()?;
        Ok(Self { code, context })
    }
}

/// COMMAND_ACK: acknowledgement of one uplink command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAck {
    pub target_id: u8,
    pub status: u8,
    pub sequence_id: u16,
    pub command_code: u16,
    pub word_count: u16,
}

impl CommandAck {
    pub const STATUS_ACCEPTED: u8 = 0;
    pub const STATUS_REJECTED: u8 = 1;
    pub const STATUS_UNKNOWN_COMMAND: u8 = 2;
    pub const STATUS_BAD_ARGUMENTS: u8 = 3;

    pub fn is_accepted(&self) -> bool {
        self.status == Self::STATUS_ACCEPTED
    }
}

impl TelemetryPayload for CommandAck {
    const PACKET_TYPE: u8 = packet_type::COMMAND_ACK;

    fn encoded_len(&self) -> usize {
        8
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_u8(self.target_id)?;
        writer.put_u8(self.status)?;
        writer.put_u16(self.sequence_id)?;
        writer.put_u16(self.command_code)?;
        writer.put_u16(self.word_count)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            target_id: reader.u8()?,
            status: reader.u8()?,
            sequence_id: reader.u16()?,
            command_code: reader.u16()?,
            word_count: reader.u16()?,
        })
    }
}

/// TEXT_MESSAGE: free-form UTF-8 log line from a flight computer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub text: String,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl TelemetryPayload for TextMessage {
    const PACKET_TYPE: u8 = packet_type::TEXT_MESSAGE;

    fn encoded_len(&self) -> usize {
        self.text.len()
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_bytes(self.text.as_bytes())
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let bytes = reader.rest();
        let text = std::str::from_utf8(bytes)
            .map_err(|e| PacketError::payload_error("TEXT_MESSAGE", e.to_string()))?;
        Ok(Self { text: text.to_string() })
    }
}

/// CONTROL_STATUS: pointing loop state of the control computer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub mode: u8,
    pub flags: u8,
    pub azimuth_target: f32,
    pub elevation_target: f32,
    pub azimuth_actual: f32,
    pub elevation_actual: f32,
    pub wheel_speed: i16,
    pub pivot_current: i16,
}

impl TelemetryPayload for ControlStatus {
    const PACKET_TYPE: u8 = packet_type::CONTROL_STATUS;

    fn encoded_len(&self) -> usize {
        24
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_u8(self.mode)?;
        writer.put_u8(self.flags)?;
        writer.put_f32(self.azimuth_target)?;
        writer.put_f32(self.elevation_target)?;
        writer.put_f32(self.azimuth_actual)?;
        writer.put_f32(self.elevation_actual)?;
        writer.put_i16(self.wheel_speed)?;
        writer.put_i16(self.pivot_current)?;
        writer.put_u16(0)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let status = Self {
            mode: reader.u8()?,
            flags: reader.u8()?,
            azimuth_target: reader.f32()?,
            elevation_target: reader.f32()?,
            azimuth_actual: reader.f32()?,
            elevation_actual: reader.f32()?,
            wheel_speed: reader.i16()?,
            pivot_current: reader.i16()?,
        };
        reader.u16()?; // reserved
        Ok(status)
    }
}

/// ASPECT_STATUS: star camera solution summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AspectStatus {
    pub frame_count: u32,
    pub exposure_us: u32,
    pub centroid_x: f32,
    pub centroid_y: f32,
    pub star_count: u16,
    pub sensor_temp_raw: u16,
    pub flags: u16,
}

impl TelemetryPayload for AspectStatus {
    const PACKET_TYPE: u8 = packet_type::ASPECT_STATUS;

    fn encoded_len(&self) -> usize {
        24
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_u32(self.frame_count)?;
        writer.put_u32(self.exposure_us)?;
        writer.put_f32(self.centroid_x)?;
        writer.put_f32(self.centroid_y)?;
        writer.put_u16(self.star_count)?;
        writer.put_u16(self.sensor_temp_raw)?;
        writer.put_u16(self.flags)?;
        writer.put_u16(0)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let status = Self {
            frame_count: reader.u32()?,
            exposure_us: reader.u32()?,
            centroid_x: reader.f32()?,
            centroid_y: reader.f32()?,
            star_count: reader.u16()?,
            sensor_temp_raw: reader.u16()?,
            flags: reader.u16()?,
        };
        reader.u16()?; // reserved
        Ok(status)
    }
}

/// ASPECT_IMAGE: one chunk of a downlinked camera frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectImageChunk {
    /// Byte offset of this chunk within the image
    pub offset: u32,
    pub data: Vec<u8>,
}

impl TelemetryPayload for AspectImageChunk {
    const PACKET_TYPE: u8 = packet_type::ASPECT_IMAGE;

    fn encoded_len(&self) -> usize {
        4 + self.data.len()
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_u32(self.offset)?;
        writer.put_bytes(&self.data)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let offset = reader.u32()?;
        Ok(Self { offset, data: reader.rest().to_vec() })
    }
}

/// DETECTOR_STATUS: counting and health state of the detector computer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub event_count: u32,
    pub livetime_ms: u32,
    pub hv_raw: u16,
    pub temps_raw: [u16; 4],
    pub threshold: u16,
    pub flags: u16,
}

impl TelemetryPayload for DetectorStatus {
    const PACKET_TYPE: u8 = packet_type::DETECTOR_STATUS;

    fn encoded_len(&self) -> usize {
        24
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_u32(self.event_count)?;
        writer.put_u32(self.livetime_ms)?;
        writer.put_u16(self.hv_raw)?;
        for &temp in &self.temps_raw {
            writer.put_u16(temp)?;
        }
        writer.put_u16(self.threshold)?;
        writer.put_u16(self.flags)?;
        writer.put_u16(0)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let event_count = reader.u32()?;
        let livetime_ms = reader.u32()?;
        let hv_raw = reader.u16()?;
        let mut temps_raw = [0u16; 4];
        for temp in &mut temps_raw {
            *temp = reader.u16()?;
        }
        let threshold = reader.u16()?;
        let flags = reader.u16()?;
        reader.u16()?; // reserved
        Ok(Self { event_count, livetime_ms, hv_raw, temps_raw, threshold, flags })
    }
}

/// DETECTOR_EVENTS: raw event words as read from the front-end FIFO.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorEvents {
    pub words: Vec<u16>,
}

impl TelemetryPayload for DetectorEvents {
    const PACKET_TYPE: u8 = packet_type::DETECTOR_EVENTS;

    fn encoded_len(&self) -> usize {
        2 * self.words.len()
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        self.words.iter().try_for_each(|&word| writer.put_u16(word))
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        if reader.remaining() % 2 != 0 {
            return Err(PacketError::payload_error(
                "DETECTOR_EVENTS",
                format!("{} bytes is not a whole number of words", reader.remaining()),
            ));
        }
        let words = (0..reader.remaining() / 2).map(|_| reader.u16()).collect::<Result<_>>()?;
        Ok(Self { words })
    }
}

/// Number of ADC channels in a housekeeping frame.
pub const HOUSEKEEPING_CHANNELS: usize = 16;

/// HOUSEKEEPING: raw ADC channels and the heater output mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Housekeeping {
    pub adc_raw: [u16; HOUSEKEEPING_CHANNELS],
    pub heater_mask: u16,
}

impl Housekeeping {
    pub fn heater_on(&self, heater: u32) -> bool {
        heater < 16 && self.heater_mask & (1 << heater) != 0
    }
}

impl TelemetryPayload for Housekeeping {
    const PACKET_TYPE: u8 = packet_type::HOUSEKEEPING;

    fn encoded_len(&self) -> usize {
        2 * HOUSEKEEPING_CHANNELS + 2
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        for &channel in &self.adc_raw {
            writer.put_u16(channel)?;
        }
        writer.put_u16(self.heater_mask)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        let mut adc_raw = [0u16; HOUSEKEEPING_CHANNELS];
        for channel in &mut adc_raw {
            *channel = reader.u16()?;
        }
        Ok(Self { adc_raw, heater_mask: reader.u16()? })
    }
}

/// FDR_STATUS: flight data recorder state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdrStatus {
    pub files_written: u32,
    pub bytes_free: u64,
    pub write_errors: u16,
    pub active_stream: u8,
    pub flags: u8,
}

impl TelemetryPayload for FdrStatus {
    const PACKET_TYPE: u8 = packet_type::FDR_STATUS;

    fn encoded_len(&self) -> usize {
        16
    }

    fn encode(&self, writer: &mut FieldWriter<'_>) -> Result<()> {
        writer.put_u32(self.files_written)?;
        writer.put_u64(self.bytes_free)?;
        writer.put_u16(self.write_errors)?;
        writer.put_u8(self.active_stream)?;
        writer.put_u8(self.flags)
    }

    fn decode(reader: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            files_written: reader.u32()?,
            bytes_free: reader.u64()?,
            write_errors: reader.u16()?,
            active_stream: reader.u8()?,
            flags: reader.u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeSchemaRegistry;

    fn encoded<T: TelemetryPayload>(payload: &T) -> Vec<u8> {
        let mut bytes = vec![0u8; payload.encoded_len()];
        let mut writer = FieldWriter::new(&mut bytes);
        payload.encode(&mut writer).unwrap();
        assert_eq!(writer.written(), payload.encoded_len());
        bytes
    }

    #[test]
    fn fixed_layouts_match_registered_lengths() {
        let registry = TypeSchemaRegistry::standard();
        let lengths = [
            (CommandAck::PACKET_TYPE, CommandAck::default().encoded_len()),
            (ControlStatus::PACKET_TYPE, ControlStatus::default().encoded_len()),
            (AspectStatus::PACKET_TYPE, AspectStatus::default().encoded_len()),
            (DetectorStatus::PACKET_TYPE, DetectorStatus::default().encoded_len()),
            (Housekeeping::PACKET_TYPE, Housekeeping::default().encoded_len()),
            (FdrStatus::PACKET_TYPE, FdrStatus::default().encoded_len()),
        ];
        for (packet_type, len) in lengths {
            let entry = registry.entry(packet_type).unwrap();
            assert!(!entry.variable_length, "{}", entry.name);
            assert_eq!(entry.max_length, len, "{}", entry.name);
        }
    }

    #[test]
    fn command_ack_field_order() {
        let ack = CommandAck {
            target_id: 0x02,
            status: CommandAck::STATUS_REJECTED,
            sequence_id: 0x1234,
            command_code: 0x00AA,
            word_count: 3,
        };
        assert_eq!(encoded(&ack), vec![0x02, 0x01, 0x34, 0x12, 0xAA, 0x00, 0x03, 0x00]);
        assert!(!ack.is_accepted());
    }

    #[test]
    fn error_report_limits_context() {
        let report = ErrorReport::new(3, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(report.context, vec![1, 2, 3, 4]);
        assert_eq!(report.encoded_len(), 20);

        let bytes = [0x03, 0x00, 0x05, 0x00];
        let result = ErrorReport::decode(&mut FieldReader::new(&bytes));
        assert!(matches!(result, Err(PacketError::Payload { .. })));
    }

    #[test]
    fn malformed_variable_payloads_are_reported() {
        let invalid_utf8 = [0xFF, 0xFE];
        assert!(matches!(
            TextMessage::decode(&mut FieldReader::new(&invalid_utf8)),
            Err(PacketError::Payload { .. })
        ));

        let odd = [1, 2, 3];
        assert!(matches!(
            DetectorEvents::decode(&mut FieldReader::new(&odd)),
            Err(PacketError::Payload { .. })
        ));
    }

    #[test]
    fn short_payloads_end_early() {
        let bytes = encoded(&FdrStatus { bytes_free: 1 << 40, ..Default::default() });
        let result = FdrStatus::decode(&mut FieldReader::new(&bytes[..10]));
        assert!(matches!(result, Err(PacketError::EndOfPacket { .. })));
    }

    #[test]
    fn heater_mask_bits() {
        let hk = Housekeeping { heater_mask: 0b101, ..Default::default() };
        assert!(hk.heater_on(0));
        assert!(!hk.heater_on(1));
        assert!(hk.heater_on(2));
        assert!(!hk.heater_on(40));
    }
}
