//! Benchmarks for the buffering and drain path.
//!
//! Runs against the scripted in-memory transport, so the numbers measure the
//! producer's own bookkeeping: token allocation, store updates, report
//! correlation and retry scheduling.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use spool_core::{transport::mock::ScriptedTransport, BufferedProducer};

fn buffered(count: usize, transport: ScriptedTransport) -> BufferedProducer<ScriptedTransport> {
    let mut producer = BufferedProducer::new(transport);
    for i in 0..count {
        let builder = producer.make_builder("bench").key(i.to_string()).payload(vec![0u8; 256]);
        producer.add_message(builder).unwrap();
    }
    producer
}

/// Benchmarks enqueueing without flushing.
fn bench_add_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_message");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_topic", |b| {
        let mut producer = BufferedProducer::new(ScriptedTransport::new());
        b.iter(|| {
            let builder = producer.make_builder("bench").payload(&b"payload"[..]);
            black_box(producer.add_message(builder).unwrap())
        });
    });

    group.finish();
}

/// Benchmarks draining buffers of different sizes.
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("acknowledged", count), &count, |b, &count| {
            b.iter_batched(
                || buffered(count, ScriptedTransport::new()),
                |mut producer| producer.flush().unwrap(),
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("backpressure", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let mut transport = ScriptedTransport::new();
                    transport.with_queue_capacity(64).with_reports_per_poll(16);
                    buffered(count, transport)
                },
                |mut producer| producer.flush().unwrap(),
                BatchSize::LargeInput,
            );
        });

        let failures = BenchmarkId::new("ten_percent_failures", count);
        group.bench_with_input(failures, &count, |b, &count| {
            b.iter_batched(
                || {
                    let mut transport = ScriptedTransport::new();
                    transport.fail_next_deliveries(count / 10, "transient");
                    buffered(count, transport)
                },
                |mut producer| producer.flush().unwrap(),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_add_message, bench_flush);
criterion_main!(benches);
