//! Fixed-capacity packet storage.
//!
//! [`PacketBuffer`] owns the byte arena of one packet. Its capacity is fixed at
//! construction (header size plus the largest payload the packet kind accepts) and
//! every write is checked against it, so a packet can never grow past the memory it
//! was given.

use crate::codec;
use crate::{PacketError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity].into_boxed_slice(), len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently occupied.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Occupied bytes, `[0, len)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Forget the contents. The arena is zeroed so stale bytes never leak into a
    /// later packet.
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }

    /// Set the occupied length without touching the bytes.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.capacity() {
            return Err(PacketError::BufferFull { requested: len, available: self.capacity() });
        }
        self.len = len;
        Ok(())
    }

    /// Fail with `BufferFull` if `n` more bytes would not fit.
    pub fn ensure_write_space(&self, n: usize) -> Result<()> {
        let available = self.capacity() - self.len;
        if n > available {
            return Err(PacketError::BufferFull { requested: n, available });
        }
        Ok(())
    }

    /// Fail with `EndOfPacket` if fewer than `n` bytes remain between `position`
    /// and the declared end of the packet.
    pub fn ensure_read_space(&self, position: usize, n: usize, end: usize) -> Result<()> {
        let end = end.min(self.len);
        let remaining = end.saturating_sub(position);
        if n > remaining {
            return Err(PacketError::EndOfPacket { requested: n, remaining });
        }
        Ok(())
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.ensure_write_space(1)?;
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_write_space(bytes.len())?;
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Replace the contents with a copy of `bytes`.
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.capacity() {
            return Err(PacketError::BufferFull {
                requested: bytes.len(),
                available: self.capacity(),
            });
        }
        self.clear();
        self.extend_from_slice(bytes)
    }

    pub fn write_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write_bytes(offset, &[value])
    }

    pub fn write_word(&mut self, offset: usize, value: u16) -> Result<()> {
        codec::write_u16_le(&mut self.data, offset, value)
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        codec::write_u32_le(&mut self.data, offset, value)
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let available = self.capacity().saturating_sub(offset);
        match self.data.get_mut(offset..offset.saturating_add(bytes.len())) {
            Some(target) => {
                target.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(PacketError::BufferFull { requested: bytes.len(), available }),
        }
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.data
            .get(offset)
            .copied()
            .ok_or(PacketError::EndOfPacket { requested: 1, remaining: 0 })
    }

    pub fn read_word(&self, offset: usize) -> Result<u16> {
        codec::read_u16_le(&self.data, offset)
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        codec::read_u32_le(&self.data, offset)
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.get(offset..offset.saturating_add(len)).ok_or(PacketError::EndOfPacket {
            requested: len,
            remaining: self.capacity().saturating_sub(offset),
        })
    }
}
