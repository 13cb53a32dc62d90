use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use urft::mode::SessionMode;
use urft::pacing::{burst_cap, retry_timeout, Progress};
use urft::wire::{decode_data, encode_data};

fn bench_framing(c: &mut Criterion) {
    let payload = vec![0xA5u8; 1024];
    let datagram = encode_data(512, 1024, &payload);

    c.bench_function("encode_data_1k", |b| {
        b.iter(|| encode_data(black_box(512), black_box(1024), black_box(&payload)))
    });

    c.bench_function("decode_data_1k", |b| {
        b.iter(|| decode_data(black_box(&datagram)).unwrap())
    });
}

fn bench_pacing(c: &mut Criterion) {
    let progress = Progress::new(Duration::from_secs(70), Duration::from_secs(120), 400, 1024);

    c.bench_function("burst_cap", |b| {
        b.iter(|| burst_cap(black_box(SessionMode::ExtremeRtt), black_box(&progress)))
    });

    c.bench_function("retry_timeout", |b| {
        b.iter(|| {
            retry_timeout(
                black_box(SessionMode::HighRtt),
                Duration::from_millis(200),
                Duration::from_millis(500),
                black_box(5),
                black_box(&progress),
            )
        })
    });
}

criterion_group!(benches, bench_framing, bench_pacing);
criterion_main!(benches);
