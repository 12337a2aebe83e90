//! Performance benchmarks for StompCodec.
//!
//! A kiosk sees at most a few scan messages per second, but the broker may
//! batch several frames and heart-beats into one WebSocket message. These
//! benchmarks keep decoding of such batches cheap.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};
use checador_protocol::{Frame, StompCodec, StompItem, frames};

const SCAN_BODY: &str = r#"{"readerName":"LECTOR-01","identificado":true,"empleadoId":1042,"nombreCompleto":"Ana Ruiz Soto","rfc":"RUSA800101AB1"}"#;

fn scan_message(n: usize) -> Frame {
    frames::message(
        "sub-0",
        "/topic/checador/LECTOR-01",
        &format!("m-{n}"),
        SCAN_BODY,
    )
}

/// Benchmark encoding a scan MESSAGE frame.
fn bench_encode_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message");
    group.throughput(Throughput::Elements(1));

    let frame = scan_message(0);

    group.bench_function("encode_scan_message", |b| {
        b.iter(|| {
            let mut codec = StompCodec::new();
            let mut buffer = BytesMut::new();
            codec.encode(black_box(frame.clone()), &mut buffer).unwrap();
            black_box(buffer);
        });
    });

    group.finish();
}

/// Benchmark decoding a scan MESSAGE frame.
fn bench_decode_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_message");
    group.throughput(Throughput::Elements(1));

    let encoded = scan_message(0).to_bytes();

    group.bench_function("decode_scan_message", |b| {
        b.iter(|| {
            let mut codec = StompCodec::new();
            let mut buffer = BytesMut::from(&encoded[..]);
            let result = codec.decode(&mut buffer).unwrap();
            black_box(result);
        });
    });

    group.finish();
}

/// Benchmark decoding batches of frames interleaved with heart-beats.
fn bench_decode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_batch");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));

        let mut codec = StompCodec::new();
        let mut encoded = BytesMut::new();
        for n in 0..*batch_size {
            codec.encode(StompItem::Heartbeat, &mut encoded).unwrap();
            codec.encode(scan_message(n), &mut encoded).unwrap();
        }
        let encoded_bytes = encoded.freeze();

        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, _| {
                b.iter(|| {
                    let mut codec = StompCodec::new();
                    let mut buffer = BytesMut::from(&encoded_bytes[..]);
                    let mut count = 0;

                    while let Ok(Some(item)) = codec.decode(&mut buffer) {
                        if matches!(item, StompItem::Frame(_)) {
                            count += 1;
                        }
                    }

                    black_box(count);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark decoding a frame delivered in small pieces.
fn bench_decode_fragmented(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_fragmented");
    group.throughput(Throughput::Elements(1));

    let encoded = scan_message(0).to_bytes();

    group.bench_function("decode_16_byte_chunks", |b| {
        b.iter(|| {
            let mut codec = StompCodec::new();
            let mut buffer = BytesMut::new();
            let mut result = None;

            for chunk in encoded.chunks(16) {
                buffer.extend_from_slice(chunk);
                if let Some(item) = codec.decode(&mut buffer).unwrap() {
                    result = Some(item);
                }
            }

            black_box(result);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_message,
    bench_decode_message,
    bench_decode_batch,
    bench_decode_fragmented
);
criterion_main!(benches);
