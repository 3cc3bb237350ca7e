//! Packet checksum computation.
//!
//! Both packet kinds carry a 16-bit checksum at byte offset 6 of their header. It is
//! computed over the whole packet (`[0, current_length)`) with the two checksum bytes
//! taken as zero, then stored little-endian.
//!
//! The CRC-16 variant deployed on the ground segment is selected through
//! [`ChecksumAlgorithm`] so it can be pinned from configuration once validated
//! against captured flight packets. [`ChecksumAlgorithm::CcittFalse`] is the default.

use crc::{CRC_16_ARC, CRC_16_IBM_3740, CRC_16_KERMIT, CRC_16_MODBUS, CRC_16_XMODEM, Crc};
use serde::{Deserialize, Serialize};

/// Byte offset of the checksum field in both header layouts.
pub const CHECKSUM_OFFSET: usize = 6;

/// Width of the checksum field in bytes.
pub const CHECKSUM_SIZE: usize = 2;

static CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
static KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);
static XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
static MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);
static ARC: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Supported CRC-16 parameter sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumAlgorithm {
    /// CRC-16/IBM-3740 (poly 0x1021, init 0xFFFF), a.k.a. CCITT-FALSE
    #[default]
    CcittFalse,
    /// CRC-16/KERMIT (poly 0x1021 reflected, init 0x0000)
    Kermit,
    /// CRC-16/XMODEM (poly 0x1021, init 0x0000)
    Xmodem,
    /// CRC-16/MODBUS (poly 0x8005 reflected, init 0xFFFF)
    Modbus,
    /// CRC-16/ARC (poly 0x8005 reflected, init 0x0000)
    Arc,
}

impl ChecksumAlgorithm {
    fn crc(self) -> &'static Crc<u16> {
        match self {
            ChecksumAlgorithm::CcittFalse => &CCITT_FALSE,
            ChecksumAlgorithm::Kermit => &KERMIT,
            ChecksumAlgorithm::Xmodem => &XMODEM,
            ChecksumAlgorithm::Modbus => &MODBUS,
            ChecksumAlgorithm::Arc => &ARC,
        }
    }
}

/// Computes packet checksums with a fixed algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumEngine {
    algorithm: ChecksumAlgorithm,
}

impl ChecksumEngine {
    pub const fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Checksum of `bytes` as-is.
    pub fn checksum(&self, bytes: &[u8]) -> u16 {
        self.algorithm.crc().checksum(bytes)
    }

    /// Checksum of a packet image with the checksum field read as zero.
    ///
    /// The packet bytes are never modified. Images shorter than the checksum field
    /// are checksummed as-is.
    pub fn packet_checksum(&self, packet: &[u8]) -> u16 {
        let field_end = CHECKSUM_OFFSET + CHECKSUM_SIZE;
        if packet.len() < field_end {
            return self.checksum(packet);
        }

        let mut digest = self.algorithm.crc().digest();
        digest.update(&packet[..CHECKSUM_OFFSET]);
        digest.update(&[0u8; CHECKSUM_SIZE]);
        digest.update(&packet[field_end..]);
        digest.finalize()
    }

    /// Checksum currently stored in a packet image.
    pub fn stored_checksum(packet: &[u8]) -> Option<u16> {
        packet
            .get(CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_SIZE)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Compute and store the checksum in place.
    pub fn seal(&self, packet: &mut [u8]) -> Option<u16> {
        if packet.len() < CHECKSUM_OFFSET + CHECKSUM_SIZE {
            return None;
        }
        let sum = self.packet_checksum(packet);
        packet[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_SIZE].copy_from_slice(&sum.to_le_bytes());
        Some(sum)
    }

    /// Returns `(stored, computed)` for a packet image.
    pub fn verify(&self, packet: &[u8]) -> Option<(u16, u16)> {
        let stored = Self::stored_checksum(packet)?;
        Some((stored, self.packet_checksum(packet)))
    }
}
