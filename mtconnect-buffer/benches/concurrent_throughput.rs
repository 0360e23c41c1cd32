use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mtconnect_buffer::{ObservationBuffer, ObservationFilter};
use mtconnect_types::{Category, Observation};
use std::sync::Arc;
use std::thread;

/// Benchmark concurrent appends with varying writer counts
fn bench_concurrent_appends(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_appends");

    for thread_count in [1, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*thread_count as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::new("threads", thread_count),
            thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let buffer = Arc::new(ObservationBuffer::new(4_096));
                    let mut handles_vec = vec![];

                    for thread_id in 0..thread_count {
                        let buffer = Arc::clone(&buffer);
                        handles_vec.push(thread::spawn(move || {
                            let item = format!("item-{}", thread_id);
                            for i in 0..1000 {
                                let pending = Observation::builder("mill-1", item.as_str())
                                    .category(Category::Sample)
                                    .value(i.to_string())
                                    .build();
                                black_box(buffer.append(pending).unwrap());
                            }
                        }));
                    }

                    for join_handle in handles_vec {
                        join_handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

/// Benchmark appends while readers take current snapshots
fn bench_appends_with_readers(c: &mut Criterion) {
    let mut group = c.benchmark_group("appends_with_readers");

    for reader_count in [1, 4].iter() {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(reader_count),
            reader_count,
            |b, &reader_count| {
                b.iter(|| {
                    let buffer = Arc::new(ObservationBuffer::new(4_096));
                    let mut readers = vec![];

                    for _ in 0..reader_count {
                        let buffer = Arc::clone(&buffer);
                        readers.push(thread::spawn(move || {
                            let all = ObservationFilter::all();
                            for _ in 0..100 {
                                black_box(buffer.latest(&all));
                            }
                        }));
                    }

                    for i in 0..1000 {
                        let pending = Observation::builder("mill-1", "x")
                            .value(i.to_string())
                            .build();
                        black_box(buffer.append(pending).unwrap());
                    }

                    for reader in readers {
                        reader.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_concurrent_appends, bench_appends_with_readers);
criterion_main!(benches);
