//! # Monitoring Broker Benchmarks
//!
//! | Area | Operation |
//! |------|-----------|
//! | mb-01 Event Codec | field-map encode / decode of one event |
//! | mb-02 BBDO | frame chain write / reassembly, checksum |
//! | shared-bus | publish fan-out to N subscribers |

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mb_02_bbdo::checksum::crc16;
use mb_02_bbdo::frame::{write_frames, FrameAssembler, ParseResult};
use mb_tests::fixtures::{codec, service_status};
use shared_bus::{Engine, EngineConfig, SubscriberConfig};

// ============================================================================
// mb-01: Event Codec
// ============================================================================

fn bench_event_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("mb-01-event-codec");
    let codec = codec();
    let event = service_status(12, 345);
    let payload = codec.encode(&event).unwrap_or_default();

    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode_service_status", |b| {
        b.iter(|| black_box(codec.encode(black_box(&event))))
    });
    group.bench_function("decode_service_status", |b| {
        b.iter(|| black_box(codec.decode(event.type_code(), black_box(&payload))))
    });
    group.finish();
}

// ============================================================================
// mb-02: BBDO framing
// ============================================================================

fn bench_bbdo_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("mb-02-bbdo");
    let event = service_status(1, 1);

    group.bench_function("crc16_header", |b| {
        let header = [0x5Au8; 14];
        b.iter(|| black_box(crc16(black_box(&header))))
    });

    for size in [64usize, 4_096, 200_000] {
        let payload = vec![0xA5u8; size];
        let mut framed = BytesMut::new();
        write_frames(&mut framed, event.type_code(), 0, 0, &payload);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("write_frames", size), &payload, |b, payload| {
            let mut buf = BytesMut::with_capacity(framed.len());
            b.iter(|| {
                buf.clear();
                write_frames(&mut buf, event.type_code(), 0, 0, black_box(payload));
            })
        });
        group.bench_with_input(BenchmarkId::new("assemble_frames", size), &framed, |b, framed| {
            let mut assembler = FrameAssembler::new(true, usize::MAX);
            b.iter(|| {
                let mut buf = framed.clone();
                match assembler.feed(black_box(&mut buf)) {
                    Ok(ParseResult::Complete { consumed, .. }) => black_box(consumed),
                    _ => 0,
                }
            })
        });
    }
    group.finish();
}

// ============================================================================
// shared-bus: Engine fan-out
// ============================================================================

fn bench_engine_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared-bus");
    let event = service_status(3, 4);

    for subscribers in [1usize, 4, 16] {
        let engine = match Engine::new(EngineConfig::default()) {
            Ok(engine) => engine,
            Err(_) => return,
        };
        engine.start();
        let mut queues: Vec<_> = (0..subscribers)
            .filter_map(|i| engine.subscribe(SubscriberConfig::new(format!("sub-{i}"))).ok())
            .collect();

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("publish_and_drain", subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    let _ = engine.publish(event.clone());
                    for queue in &mut queues {
                        black_box(queue.try_recv());
                    }
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_event_codec, bench_bbdo_frames, bench_engine_fan_out);
criterion_main!(benches);
