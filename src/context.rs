//! Per-node packet context.
//!
//! Everything a packet needs from its surroundings travels in one [`PacketContext`]
//! handed to every packet at construction: the node's source id, the clock used for
//! telemetry timestamps, the checksum algorithm, the telemetry type registry, the
//! command payload bound and the command sequence counter. There is no process-wide
//! mutable state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::{ChecksumAlgorithm, ChecksumEngine};
use crate::command::{DEFAULT_MAX_COMMAND_PAYLOAD, MAX_COMMAND_PAYLOAD_LIMIT};
use crate::registry::TypeSchemaRegistry;

/// Telemetry timestamp as carried on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub seconds: u32,
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(seconds: u32, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Build from signed nanoseconds since the epoch, clamping out-of-range values.
    pub fn from_epoch_nanos(total: i128) -> Self {
        let total = total.clamp(0, (u32::MAX as i128 + 1) * 1_000_000_000 - 1);
        Self { seconds: (total / 1_000_000_000) as u32, nanos: (total % 1_000_000_000) as u32 }
    }

    pub fn as_epoch_nanos(&self) -> i128 {
        self.seconds as i128 * 1_000_000_000 + self.nanos as i128
    }
}

/// Source of telemetry timestamps.
pub trait TimeSource: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock with an optional correction applied to every reading.
///
/// Ground and flight clocks drift apart during a flight; the correction is the
/// offset last measured against the reference clock.
#[derive(Debug, Default)]
pub struct SystemClock {
    correction_nanos: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correction(correction_nanos: i64) -> Self {
        Self { correction_nanos }
    }

    pub fn correction_nanos(&self) -> i64 {
        self.correction_nanos
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        let raw = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i128).unwrap_or(0);
        Timestamp::from_epoch_nanos(raw + self.correction_nanos as i128)
    }
}

/// Clock that always returns the same instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock(pub Timestamp);

impl TimeSource for FixedClock {
    fn now(&self) -> Timestamp {
        self.0
    }
}

/// Shared configuration for all packets created by one node.
pub struct PacketContext {
    source_id: u8,
    clock: Arc<dyn TimeSource>,
    checksum: ChecksumEngine,
    registry: Arc<TypeSchemaRegistry>,
    command_max_payload: usize,
    sequence: AtomicU16,
}

impl PacketContext {
    /// Context with the system clock, default checksum and the standard registry.
    pub fn new(source_id: u8) -> Self {
        Self {
            source_id,
            clock: Arc::new(SystemClock::new()),
            checksum: ChecksumEngine::default(),
            registry: Arc::new(TypeSchemaRegistry::standard().clone()),
            command_max_payload: DEFAULT_MAX_COMMAND_PAYLOAD,
            sequence: AtomicU16::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = ChecksumEngine::new(algorithm);
        self
    }

    pub fn with_registry(mut self, registry: Arc<TypeSchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Exclusive bound on command payload lengths, clamped to `1..=256`.
    pub fn with_command_max_payload(mut self, max_payload: usize) -> Self {
        self.command_max_payload = max_payload.clamp(1, MAX_COMMAND_PAYLOAD_LIMIT);
        self
    }

    /// First sequence id handed out by [`next_sequence`](Self::next_sequence).
    pub fn with_sequence_start(self, start: u16) -> Self {
        self.sequence.store(start, Ordering::Relaxed);
        self
    }

    pub fn source_id(&self) -> u8 {
        self.source_id
    }

    pub fn checksum(&self) -> &ChecksumEngine {
        &self.checksum
    }

    pub fn registry(&self) -> &TypeSchemaRegistry {
        &self.registry
    }

    pub fn command_max_payload(&self) -> usize {
        self.command_max_payload
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Monotonic command sequence id, wrapping at `u16::MAX`.
    pub fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for PacketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketContext")
            .field("source_id", &self.source_id)
            .field("clock", &self.clock)
            .field("checksum", &self.checksum.algorithm())
            .field("registry_types", &self.registry.len())
            .field("command_max_payload", &self.command_max_payload)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ids_are_monotonic_and_wrap() {
        let ctx = PacketContext::new(1).with_sequence_start(u16::MAX - 1);
        assert_eq!(ctx.next_sequence(), u16::MAX - 1);
        assert_eq!(ctx.next_sequence(), u16::MAX);
        assert_eq!(ctx.next_sequence(), 0);
    }

    #[test]
    fn timestamps_split_and_clamp() {
        let ts = Timestamp::from_epoch_nanos(5_000_000_123);
        assert_eq!(ts, Timestamp::new(5, 123));
        assert_eq!(ts.as_epoch_nanos(), 5_000_000_123);
        assert_eq!(Timestamp::from_epoch_nanos(-10), Timestamp::new(0, 0));
        assert_eq!(Timestamp::from_epoch_nanos(i128::MAX).seconds, u32::MAX);
    }

    #[test]
    fn clock_correction_is_applied() {
        let behind = SystemClock::with_correction(-3_600 * 1_000_000_000);
        let plain = SystemClock::new();
        let delta = plain.now().as_epoch_nanos() - behind.now().as_epoch_nanos();
        assert!(delta >= 3_599 * 1_000_000_000, "delta was {delta}");
    }

    #[test]
    fn fixed_clock_feeds_context() {
        let ctx = PacketContext::new(7).with_clock(Arc::new(FixedClock(Timestamp::new(42, 7))));
        assert_eq!(ctx.now(), Timestamp::new(42, 7));
        assert_eq!(ctx.source_id(), 7);
        assert_eq!(ctx.command_max_payload(), DEFAULT_MAX_COMMAND_PAYLOAD);
        assert!(format!("{ctx:?}").contains("source_id: 7"));
    }

    #[test]
    fn command_payload_bound_is_clamped() {
        assert_eq!(PacketContext::new(1).with_command_max_payload(0).command_max_payload(), 1);
        assert_eq!(PacketContext::new(1).with_command_max_payload(1000).command_max_payload(), 256);
        assert_eq!(PacketContext::new(1).with_command_max_payload(64).command_max_payload(), 64);
    }
}
