// Criterion benchmarks for the secret-common wire layer
//
// Run benchmarks with:
//   cargo bench -p secret-common

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use secret_common::crypto::SymmetricKey;
use secret_common::transport::{DataFrame, FramePacker, FrameReader, DEFAULT_MAX_FRAME_PAYLOAD};
use secret_common::{ComputeMessage, Frame, SenderId};

fn sample_records(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}:{}\tA/G\t{}\t64\t{}", i % 22 + 1, 10_000 + i, i % 4, "Q".repeat(44)))
        .collect()
}

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");

    let frame = Frame::new(
        SenderId::new("dpi1").unwrap(),
        ComputeMessage::Data,
        vec![b'x'; 60_000],
    );
    let wire = frame.encode();

    group.bench_function("encode_60k", |b| {
        b.iter(|| black_box(&frame).encode());
    });

    group.bench_function("read_60k", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new(Cursor::new(black_box(&wire)));
            reader.read_frame().unwrap()
        });
    });

    group.finish();
}

fn bench_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_frame_packing");
    let records = sample_records(10_000);

    group.bench_function("pack_10k_records", |b| {
        b.iter(|| FramePacker::pack(DEFAULT_MAX_FRAME_PAYLOAD, black_box(records.clone())));
    });

    let frames = FramePacker::pack(DEFAULT_MAX_FRAME_PAYLOAD, records.clone());
    let encoded: Vec<Vec<u8>> = frames.iter().map(DataFrame::encode).collect();
    group.bench_function("decode_10k_records", |b| {
        b.iter(|| {
            encoded
                .iter()
                .map(|payload| DataFrame::decode(black_box(payload)).unwrap().records.len())
                .sum::<usize>()
        });
    });

    group.finish();
}

fn bench_symmetric(c: &mut Criterion) {
    let key = SymmetricKey::generate().unwrap();
    let plaintext = vec![0x5au8; 256];

    c.bench_function("aes_256_cbc_encrypt_256b", |b| {
        b.iter(|| key.encrypt(black_box(&plaintext)).unwrap());
    });
}

criterion_group!(benches, bench_frame_codec, bench_packing, bench_symmetric);
criterion_main!(benches);
