//! Benchmark suite for the service data decoders and manufacturer parsing.
//!
//! Isolates decoding from the async runtime and the publish path.

use ble_mqtt::manufacturer::ManufacturerFrame;
use ble_mqtt::registry;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

/// Eddystone-URL frame for `https://www.example.com`
fn eddystone_payload() -> Vec<u8> {
    let mut payload = vec![0x10, 0xEB, 0x01];
    payload.extend_from_slice(b"example.com");
    payload
}

/// Benchmark every registered identifier with a representative payload
fn bench_decode_by_identifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_identifier");
    group.throughput(Throughput::Elements(1));

    let cases: Vec<(&str, Vec<u8>)> = vec![
        ("1809", vec![0x34, 0x08]),
        ("2a6e", vec![0x34, 0x08]),
        ("2a6f", vec![0x10, 0x0E]),
        ("2a6d", vec![0x2C, 0x8B, 0x0F, 0x00]),
        ("180f", vec![0x64]),
        ("feaa", eddystone_payload()),
        ("6e400003b5a3f393e0a9e50e24dcca9e", vec![0x01, 0x02, 0x03]),
    ];

    for (id, payload) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(id), payload, |b, payload| {
            b.iter(|| black_box(registry::decode(black_box(id), black_box(payload))))
        });
    }

    group.finish();
}

/// Benchmark manufacturer data splitting and Espruino JSON5 decoding
fn bench_manufacturer(c: &mut Criterion) {
    let mut group = c.benchmark_group("manufacturer");

    let espruino = b"\x90\x05{t:21.5,light:0.8,btn:true}".to_vec();
    let other = vec![0x99, 0x04, 0x05, 0x12, 0xFC, 0x53, 0x94, 0xC3, 0x7C];

    group.bench_function("parse_other", |b| {
        b.iter(|| black_box(ManufacturerFrame::parse(black_box(&other))))
    });

    group.bench_function("espruino_object", |b| {
        b.iter(|| {
            let frame = ManufacturerFrame::parse(black_box(&espruino)).unwrap();
            black_box(frame.embedded_object().unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode_by_identifier, bench_manufacturer);
criterion_main!(benches);
