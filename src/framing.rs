//! Byte-stream reassembly shared by both packet kinds.
//!
//! A packet is rebuilt one byte at a time by [`Reassemble::scan_byte`]. The two
//! drivers layered on top differ only in how they react to a framing violation:
//!
//! - [`Reassemble::process_buffer`] stops at the first violation and returns it, so
//!   the caller can realign by hand;
//! - [`Reassemble::process_input`] never stops: it counts the violation, lets the
//!   packet reset and keeps scanning, which suits unattended background readers.
//!
//! Both report how much of the input they consumed through a caller-owned cursor,
//! so a packet split across any number of reads is rebuilt by calling them again
//! with the next chunk.

use tracing::{trace, warn};

use crate::{PacketError, Result};

/// Sync word opening every packet.
pub const SYNC_WORD: u16 = 0xC39A;

/// The sync word as it appears on the wire.
pub const SYNC_BYTES: [u8; 2] = SYNC_WORD.to_le_bytes();

/// Outcome of a non-failing scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A checksum-validated packet is present
    Complete,
    /// All input consumed, more bytes are needed
    Incomplete,
}

/// Lifecycle of a packet object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// Holds no packet
    Reset,
    /// Accumulating bytes from a stream
    Receiving,
    /// Being filled for transmission
    Building,
    /// Holds a complete packet with a valid checksum
    Completed,
}

/// Result of feeding one byte to a packet.
#[derive(Debug)]
pub enum ScanStep {
    /// Byte dropped while hunting for the sync word. `run_start` marks the first
    /// byte of a run of dropped bytes.
    Discarded { run_start: bool },
    /// Byte stored, packet still incomplete
    Accepted,
    /// Byte stored and the packet is complete and valid
    Complete,
    /// Framing violation; the packet has reset itself. When `consumed` is false the
    /// byte must be offered again, it may open the next packet.
    Rejected { error: PacketError, consumed: bool },
}

/// A packet that can be rebuilt from a byte stream.
pub trait Reassemble {
    /// Feed one byte. A completed packet resets itself before scanning.
    fn scan_byte(&mut self, byte: u8) -> ScanStep;

    /// Drop any partial or complete packet.
    fn reset(&mut self);

    /// Whether a complete, checksum-validated packet is present.
    fn is_completed(&self) -> bool;

    /// Feed one byte, reporting a framing violation as an error.
    ///
    /// A byte that was rejected without being consumed is offered again at once,
    /// so callers feeding bytes one by one never lose a potential sync byte.
    fn process_byte(&mut self, byte: u8) -> Result<Progress> {
        match self.scan_byte(byte) {
            ScanStep::Discarded { .. } | ScanStep::Accepted => Ok(Progress::Incomplete),
            ScanStep::Complete => Ok(Progress::Complete),
            ScanStep::Rejected { error, consumed } => {
                if !consumed {
                    // Cannot fail again: the packet is empty after a rejection
                    let _ = self.scan_byte(byte);
                }
                Err(error)
            }
        }
    }

    /// Scan `input[*cursor..]`, stopping at completion or at the first framing
    /// violation. `cursor` is advanced past every consumed byte.
    fn process_buffer(&mut self, input: &[u8], cursor: &mut usize) -> Result<Progress> {
        if self.is_completed() {
            return Ok(Progress::Complete);
        }

        while let Some(&byte) = input.get(*cursor) {
            match self.scan_byte(byte) {
                ScanStep::Discarded { .. } | ScanStep::Accepted => *cursor += 1,
                ScanStep::Complete => {
                    *cursor += 1;
                    return Ok(Progress::Complete);
                }
                ScanStep::Rejected { error, consumed } => {
                    if consumed {
                        *cursor += 1;
                    }
                    return Err(error);
                }
            }
        }

        Ok(Progress::Incomplete)
    }

    /// Scan `input[*cursor..]` until a packet completes, recovering from every
    /// framing violation. Each violation, and each run of bytes dropped while
    /// hunting for sync, increments `errors`.
    ///
    /// Returns true when a packet is complete; the cursor then points at the first
    /// byte after it.
    fn process_input(&mut self, input: &[u8], cursor: &mut usize, errors: &mut u32) -> bool {
        if self.is_completed() {
            return true;
        }

        while let Some(&byte) = input.get(*cursor) {
            match self.scan_byte(byte) {
                ScanStep::Discarded { run_start } => {
                    if run_start {
                        *errors = errors.saturating_add(1);
                    }
                    *cursor += 1;
                }
                ScanStep::Accepted => *cursor += 1,
                ScanStep::Complete => {
                    *cursor += 1;
                    return true;
                }
                ScanStep::Rejected { error, consumed } => {
                    *errors = errors.saturating_add(1);
                    warn!("Resynchronizing after framing error: {}", error);
                    if consumed {
                        *cursor += 1;
                    }
                }
            }
        }

        false
    }
}

/// Offer the tail of a rejected header to a packet that has just reset.
///
/// Any byte after the first sync byte may open the next packet, so the stored
/// header bytes after offset 0 are scanned again. The rejection that triggered the
/// rescan has already been reported; violations inside the tail are only logged.
pub(crate) fn rescan<P: Reassemble + ?Sized>(packet: &mut P, tail: &[u8]) {
    for &byte in tail {
        if let ScanStep::Rejected { error, consumed } = packet.scan_byte(byte) {
            trace!("Rescanned byte {:#04x} rejected: {}", byte, error);
            if !consumed {
                // The packet is empty again, so this cannot be rejected twice
                let _ = packet.scan_byte(byte);
            }
        }
    }
}

/// Last chunk read from a byte source and the part of it not scanned yet.
///
/// Shared by the blocking [`PacketReceiver`](crate::transport::PacketReceiver) and
/// the async stream provider: bytes after a completed packet stay here for the
/// next packet.
#[derive(Debug)]
pub(crate) struct ChunkBuffer {
    scratch: Box<[u8]>,
    start: usize,
    end: usize,
    errors: u32,
}

impl ChunkBuffer {
    pub(crate) fn new(chunk_size: usize) -> Self {
        Self { scratch: vec![0u8; chunk_size.max(1)].into_boxed_slice(), start: 0, end: 0, errors: 0 }
    }

    /// Scan buffered bytes into `packet`. Returns true when a packet completed;
    /// otherwise every buffered byte has been consumed.
    pub(crate) fn feed<P: Reassemble + ?Sized>(&mut self, packet: &mut P) -> bool {
        if self.start >= self.end {
            return false;
        }
        let mut cursor = self.start;
        let completed = packet.process_input(&self.scratch[..self.end], &mut cursor, &mut self.errors);
        self.start = cursor;
        completed
    }

    /// Space for the next read. Only valid once [`feed`](Self::feed) returned false.
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.start, self.end, "unscanned bytes would be overwritten");
        &mut self.scratch
    }

    /// Record that the last read stored `count` bytes at the start of [`spare`](Self::spare).
    pub(crate) fn filled(&mut self, count: usize) {
        self.start = 0;
        self.end = count.min(self.scratch.len());
    }

    pub(crate) fn buffered(&self) -> usize {
        self.end - self.start
    }

    pub(crate) fn errors(&self) -> u32 {
        self.errors
    }
}
