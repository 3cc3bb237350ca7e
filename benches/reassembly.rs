//! Benchmarks for packet reassembly and output preparation
//!
//! Covers:
//! - Byte-by-byte telemetry reassembly over a mixed downlink capture
//! - The same capture with line noise forcing resynchronization
//! - Command packet construction and sealing
//! - Checksum throughput per algorithm

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use gondola::test_utils::{command_bytes, sample_capture, test_context};
use gondola::{ChecksumAlgorithm, ChecksumEngine, CommandPacket, Reassemble, TelemetryPacket};
use std::hint::black_box;

fn count_packets(capture: &[u8]) -> (usize, u32) {
    let mut packet = TelemetryPacket::new(test_context());
    let mut cursor = 0;
    let mut errors = 0;
    let mut packets = 0;
    while packet.process_input(capture, &mut cursor, &mut errors) {
        packets += 1;
        packet.reset();
    }
    (packets, errors)
}

fn bench_telemetry_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("telemetry_reassembly");

    for (name, noise_every) in [("clean", 0), ("noisy", 8)] {
        let capture = sample_capture(256, noise_every);
        group.throughput(Throughput::Bytes(capture.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &capture, |b, capture| {
            b.iter(|| black_box(count_packets(black_box(capture))))
        });
    }

    group.finish();
}

fn bench_command_round_trip(c: &mut Criterion) {
    let ctx = test_context();
    let words: Vec<u16> = (0..60).collect();

    c.bench_function("command_build_and_seal", |b| {
        let mut packet = CommandPacket::new(ctx.clone());
        b.iter(|| {
            packet.reset_output_packet();
            packet.set_target_id(0x02).expect("building");
            for &word in &words {
                packet.add_word(word).expect("fits");
            }
            black_box(packet.finalize_output_packet().expect("finalizes").len())
        })
    });

    let bytes = command_bytes(0x02, &words);
    c.bench_function("command_check_buffer", |b| {
        let mut packet = CommandPacket::new(ctx.clone());
        b.iter(|| black_box(packet.check_buffer(black_box(&bytes)).is_ok()))
    });
}

fn bench_checksums(c: &mut Criterion) {
    let data = sample_capture(16, 0);
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for algorithm in [ChecksumAlgorithm::CcittFalse, ChecksumAlgorithm::Kermit, ChecksumAlgorithm::Modbus] {
        let engine = ChecksumEngine::new(algorithm);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{algorithm:?}")), &data, |b, data| {
            b.iter(|| black_box(engine.checksum(black_box(data))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_telemetry_reassembly, bench_command_round_trip, bench_checksums);
criterion_main!(benches);
