//! Link reader statistics.

use std::collections::BTreeMap;

use crate::context::Timestamp;

/// Running totals published by a link reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Completed packets
    pub packets: u64,
    /// Framing errors recovered from
    pub framing_errors: u32,
    /// Packets per telemetry type
    pub per_type: BTreeMap<u8, u64>,
    /// Timestamp of the most recent packet
    pub last_timestamp: Option<Timestamp>,
    /// Set once the source is exhausted or the reader gave up
    pub finished: bool,
}

impl LinkStats {
    pub(crate) fn record(&mut self, packet_type: u8, timestamp: Timestamp) {
        self.packets += 1;
        *self.per_type.entry(packet_type).or_default() += 1;
        self.last_timestamp = Some(timestamp);
    }

    pub fn count_of(&self, packet_type: u8) -> u64 {
        self.per_type.get(&packet_type).copied().unwrap_or(0)
    }
}
