//! Little-endian field access over byte slices.
//!
//! Headers and payloads are encoded field by field at fixed offsets instead of
//! reinterpreting buffers as packed structs. Every access is bounds checked and
//! reports [`PacketError::EndOfPacket`] (reads) or [`PacketError::BufferFull`]
//! (writes) instead of panicking.

use crate::{PacketError, Result};

/// Read a little-endian `u16` at `offset`.
pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    let bytes = slice_at(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a little-endian `u32` at `offset`.
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = slice_at(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Write a little-endian `u16` at `offset`.
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) -> Result<()> {
    write_at(data, offset, &value.to_le_bytes())
}

/// Write a little-endian `u32` at `offset`.
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    write_at(data, offset, &value.to_le_bytes())
}

fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    data.get(offset..offset.saturating_add(len)).ok_or(PacketError::EndOfPacket {
        requested: len,
        remaining: data.len().saturating_sub(offset),
    })
}

fn write_at(data: &mut [u8], offset: usize, bytes: &[u8]) -> Result<()> {
    let available = data.len().saturating_sub(offset);
    match data.get_mut(offset..offset.saturating_add(bytes.len())) {
        Some(target) => {
            target.copy_from_slice(bytes);
            Ok(())
        }
        None => Err(PacketError::BufferFull { requested: bytes.len(), available }),
    }
}

/// Sequential reader used by payload decoders.
#[derive(Debug)]
pub struct FieldReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = slice_at(self.data, self.position, len)?;
        self.position += len;
        Ok(bytes)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64()?))
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.position..];
        self.position = self.data.len();
        rest
    }
}

/// Sequential writer used by payload encoders.
#[derive(Debug)]
pub struct FieldWriter<'a> {
    data: &'a mut [u8],
    position: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.position
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        write_at(self.data, self.position, bytes)?;
        self.position += bytes.len();
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_bytes(&[value])
    }

    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i16(&mut self, value: i16) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<()> {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_f32(&mut self, value: f32) -> Result<()> {
        self.put_u32(value.to_bits())
    }

    pub fn put_f64(&mut self, value: f64) -> Result<()> {
        self.put_u64(value.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_offset_helpers() {
        let mut data = [0u8; 8];
        write_u16_le(&mut data, 0, 0xC39A).unwrap();
        write_u32_le(&mut data, 4, 0x0102_0304).unwrap();
        assert_eq!(data, [0x9A, 0xC3, 0, 0, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(read_u16_le(&data, 0).unwrap(), 0xC39A);
        assert_eq!(read_u32_le(&data, 4).unwrap(), 0x0102_0304);
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let mut data = [0u8; 4];
        assert!(matches!(
            read_u32_le(&data, 2),
            Err(PacketError::EndOfPacket { requested: 4, remaining: 2 })
        ));
        assert!(matches!(read_u16_le(&data, 10), Err(PacketError::EndOfPacket { .. })));
        assert!(matches!(
            write_u32_le(&mut data, 1, 7),
            Err(PacketError::BufferFull { requested: 4, available: 3 })
        ));
        assert_eq!(data, [0u8; 4]);
    }

    #[test]
    fn reader_and_writer_agree_on_layout() {
        let mut data = [0u8; 27];
        let mut writer = FieldWriter::new(&mut data);
        writer.put_u8(0x7F).unwrap();
        writer.put_i16(-2).unwrap();
        writer.put_u32(0xDEAD_BEEF).unwrap();
        writer.put_f32(1.5).unwrap();
        writer.put_f64(-0.25).unwrap();
        writer.put_bytes(b"ok").unwrap();
        assert_eq!(writer.written(), 21);
        assert!(matches!(writer.put_u64(0), Err(PacketError::BufferFull { .. })));

        let mut reader = FieldReader::new(&data);
        assert_eq!(reader.u8().unwrap(), 0x7F);
        assert_eq!(reader.i16().unwrap(), -2);
        assert_eq!(reader.u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.f32().unwrap(), 1.5);
        assert_eq!(reader.f64().unwrap(), -0.25);
        assert_eq!(reader.bytes(2).unwrap(), b"ok");
        assert_eq!(reader.remaining(), 6);
        assert_eq!(reader.rest().len(), 6);
        assert!(matches!(reader.u8(), Err(PacketError::EndOfPacket { .. })));
    }
}
