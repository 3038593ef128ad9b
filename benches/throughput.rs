//! Throughput benchmarks for the STM engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

use ambar::{Mode, SharedMemory};

fn bench_read_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_only");

    for words in [1usize, 16, 128].iter() {
        let mem = SharedMemory::new(words * 8, 8);
        group.throughput(Throughput::Elements(*words as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), words, |b, &words| {
            b.iter(|| {
                let mut tx = mem.begin(Mode::ReadOnly);
                let mut buf = [0u8; 8];
                for i in 0..words {
                    tx.read(mem.start_addr() + (i * 8) as u64, &mut buf).unwrap();
                    black_box(&buf);
                }
                assert!(tx.commit());
            });
        });
    }

    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for words in [1usize, 8, 64].iter() {
        let mem = SharedMemory::new(64 * 8, 8);
        group.throughput(Throughput::Elements(*words as u64));
        group.bench_with_input(BenchmarkId::from_parameter(words), words, |b, &words| {
            let mut counter = 0u64;
            b.iter(|| {
                counter += 1;
                let mut tx = mem.begin(Mode::ReadWrite);
                for i in 0..words {
                    tx.write(&counter.to_le_bytes(), mem.start_addr() + (i * 8) as u64)
                        .unwrap();
                }
                assert!(tx.commit());
            });
        });
    }

    group.finish();
}

fn bench_contended_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_counter");
    group.sample_size(10);

    for threads in [2usize, 4].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            threads,
            |b, &threads| {
                b.iter(|| {
                    let mem = Arc::new(SharedMemory::new(8, 8));
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let mem = mem.clone();
                            thread::spawn(move || {
                                let w0 = mem.start_addr();
                                for _ in 0..100 {
                                    mem.run(Mode::ReadWrite, |tx| {
                                        let mut buf = [0u8; 8];
                                        tx.read(w0, &mut buf)?;
                                        let value = u64::from_le_bytes(buf) + 1;
                                        tx.write(&value.to_le_bytes(), w0)
                                    })
                                    .unwrap();
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_read_only,
    bench_commit,
    bench_contended_counter
);
criterion_main!(benches);
