//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use thrustlog_core::core::protocol::{LineFramer, RawLine, SampleLayout, TelemetryParser};

fn telemetry_stream(lines: usize) -> Vec<u8> {
    let mut data = b"System Ready\n".to_vec();
    for i in 0..lines {
        data.extend_from_slice(format!("timestamp,{},speed,{},weight,{}\n", i * 10, i % 9 + 1, i % 40).as_bytes());
    }
    data
}

fn framer_benchmark(c: &mut Criterion) {
    let data = telemetry_stream(1000);

    let mut group = c.benchmark_group("framer");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("single_chunk", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let count = framer.feed(black_box(&data)).count();
            black_box(count)
        })
    });

    group.bench_function("serial_sized_chunks", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let mut count = 0;
            for chunk in black_box(&data).chunks(32) {
                count += framer.feed(chunk).count();
            }
            black_box(count)
        })
    });

    group.finish();
}

fn parser_benchmark(c: &mut Criterion) {
    let parser = TelemetryParser::new(SampleLayout::SpeedAndWeight);
    let mut framer = LineFramer::new();
    let lines: Vec<RawLine> = framer
        .feed(&telemetry_stream(1000))
        .collect::<Result<_, _>>()
        .unwrap();

    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Elements(lines.len() as u64));

    group.bench_function("classify", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(parser.classify(black_box(line)));
            }
        })
    });

    group.finish();
}

criterion_group!(benches, framer_benchmark, parser_benchmark);
criterion_main!(benches);
