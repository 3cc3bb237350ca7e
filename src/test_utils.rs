//! Test utilities for building packets and link captures
//!
//! Shared by unit tests and the benchmarks so both exercise the same byte layouts.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;

use crate::command::CommandPacket;
use crate::context::{FixedClock, PacketContext, Timestamp};
use crate::telemetry::TelemetryPacket;
use crate::telemetry::payloads::{
    CommandAck, DetectorEvents, Housekeeping, TelemetryPayload, TextMessage,
};

/// Source id of the node built by [`test_context`].
pub const TEST_SOURCE_ID: u8 = 0x0C;

/// Timestamp every packet built with [`test_context`] carries.
pub fn test_timestamp() -> Timestamp {
    Timestamp::new(1_718_000_000, 123_456_789)
}

/// Context with a fixed clock and the standard registry.
pub fn test_context() -> Arc<PacketContext> {
    Arc::new(PacketContext::new(TEST_SOURCE_ID).with_clock(Arc::new(FixedClock(test_timestamp()))))
}

/// Wire bytes of a sealed command packet.
///
/// # Panics
///
/// Panics if `words` does not fit the default command payload bound.
pub fn command_bytes(target: u8, words: &[u16]) -> Vec<u8> {
    let mut packet = CommandPacket::new(test_context());
    packet.reset_output_packet();
    packet.set_target_id(target).expect("fresh output packet accepts a target");
    for &word in words {
        packet.add_word(word).expect("words fit the command payload");
    }
    packet.finalize_output_packet().expect("command packet finalizes").to_vec()
}

/// Wire bytes of a sealed telemetry packet carrying `payload`.
///
/// # Panics
///
/// Panics if the payload does not match its registered schema.
pub fn telemetry_bytes<T: TelemetryPayload>(payload: &T) -> Vec<u8> {
    let mut packet = TelemetryPacket::new(test_context());
    packet.create(T::PACKET_TYPE).expect("standard telemetry type");
    packet.set_payload(payload).expect("payload matches its schema");
    packet.finalize_output_packet().expect("telemetry packet finalizes").to_vec()
}

/// A downlink capture cycling through common telemetry types, with a few bytes of
/// line noise every `noise_every` packets (0 disables noise).
pub fn sample_capture(packets: usize, noise_every: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..packets {
        if noise_every > 0 && i > 0 && i % noise_every == 0 {
            data.extend_from_slice(&[0x00, 0x13, 0x37]);
        }
        let bytes = match i % 4 {
            0 => telemetry_bytes(&Housekeeping { heater_mask: i as u16, ..Default::default() }),
            1 => telemetry_bytes(&DetectorEvents { words: (0..64).map(|w| (w * i) as u16).collect() }),
            2 => telemetry_bytes(&CommandAck { target_id: 0x02, sequence_id: i as u16, ..Default::default() }),
            _ => telemetry_bytes(&TextMessage::new(format!("frame {i}"))),
        };
        data.extend(bytes);
    }
    data
}

/// Arbitrary bytes that never contain the first sync byte.
#[cfg(test)]
pub fn garbage_without_sync(
    len: std::ops::Range<usize>,
) -> impl proptest::strategy::Strategy<Value = Vec<u8>> {
    use proptest::prelude::*;
    prop::collection::vec(any::<u8>().prop_filter("not a sync byte", |b| *b != 0x9A), len)
}

/// Line noise ending in a truncated packet header.
///
/// Sync bytes may appear anywhere, but inside the noise each one is followed by a
/// byte that cannot continue the sync word. The noise always ends in `9A`,
/// `9A C3` or `9A C3 <any>`, as left behind by a dropout right after a sync word.
#[cfg(test)]
pub fn noise_with_sync_fragment(
    len: std::ops::Range<usize>,
) -> impl proptest::strategy::Strategy<Value = Vec<u8>> {
    use proptest::prelude::*;
    let noise = prop_oneof![
        any::<u8>().prop_filter("not a sync byte", |b| *b != 0x9A).prop_map(|b| vec![b]),
        any::<u8>()
            .prop_filter("breaks the sync word", |b| *b != 0x9A && *b != 0xC3)
            .prop_map(|b| vec![0x9A, b]),
    ];
    let fragment = prop_oneof![
        Just(vec![0x9A]),
        Just(vec![0x9A, 0xC3]),
        any::<u8>().prop_map(|b| vec![0x9A, 0xC3, b]),
    ];
    (prop::collection::vec(noise, len), fragment).prop_map(|(noise, fragment)| {
        let mut bytes = noise.concat();
        bytes.extend(fragment);
        bytes
    })
}
