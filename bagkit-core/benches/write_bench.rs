//! Bag write and read benchmarks

use bagkit_core::{BagOptions, BagReader, BagWriter, Compression, Message, Query, Timestamp};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

const MESSAGES: i64 = 10_000;

fn write_bag(path: &std::path::Path, compression: Compression) {
    let mut writer = BagWriter::new(path, BagOptions::default().with_compression(compression));
    for i in 0..MESSAGES {
        writer
            .write("/chatter", &Message::from(format!("foo_{}", i)), Timestamp::from_secs(i))
            .unwrap();
        writer
            .write("/numbers", &Message::from(i), Timestamp::from_secs(i))
            .unwrap();
    }
    writer.close().unwrap();
}

/// Benchmark writing a two-channel bag per compression mode
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("bag_write");
    group.sample_size(20);
    group.throughput(Throughput::Elements(MESSAGES as u64 * 2));

    for compression in [Compression::None, Compression::Lz4, Compression::Bz2] {
        group.bench_with_input(
            BenchmarkId::from_parameter(compression),
            &compression,
            |b, &compression| {
                let temp_dir = TempDir::new().unwrap();
                let path = temp_dir.path().join("bench.bag");
                b.iter(|| write_bag(black_box(&path), compression));
            },
        );
    }

    group.finish();
}

/// Benchmark reading one channel back, lazily and time-ordered
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("bag_read");
    group.throughput(Throughput::Elements(MESSAGES as u64));

    for compression in [Compression::None, Compression::Lz4] {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bench.bag");
        write_bag(&path, compression);
        let reader = BagReader::open(&path).unwrap();
        let query = Query::all().with_channels(["/numbers"]);

        group.bench_with_input(
            BenchmarkId::new("lazy", compression),
            &query,
            |b, query| {
                b.iter(|| {
                    let count = reader.read(query).filter(|m| m.is_ok()).count();
                    black_box(count);
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("ordered", compression),
            &query,
            |b, query| {
                b.iter(|| {
                    let messages = reader.read_ordered(query).unwrap();
                    black_box(messages.len());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
