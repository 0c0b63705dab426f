//! Criterion benchmarks for the read side of the replay pipeline.
//!
//! Everything runs on in-memory recordings so results do not depend on disk.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rp_common::{Package, PackageHeader};
use rp_config::PlayerConfig;
use rp_core::buffer::{BufferLimits, BufferQueue};
use rp_core::reader::{MemoryReaderFactory, MemoryRecording, ReaderRegistry, ReaderSynchronizer};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

// ── Helpers ─────────────────────────────────────────────────────────────

/// Registry with `readers` interleaved streams of `per_reader` packages each.
fn make_registry(readers: usize, per_reader: u64) -> (Arc<ReaderRegistry>, Vec<PathBuf>) {
    let factory = MemoryReaderFactory::new("mem");
    let mut paths = Vec::with_capacity(readers);
    for r in 0..readers {
        let timestamps: Vec<u64> = (0..per_reader).map(|i| i * readers as u64 + r as u64).collect();
        let recording = MemoryRecording::new(format!("dev{r}"))
            .packages_at(&timestamps, 64)
            .batch_size(32);
        let path = PathBuf::from(format!("stream{r}.mem"));
        factory.insert(path.clone(), recording);
        paths.push(path);
    }
    let mut registry = ReaderRegistry::new();
    if registry.register(Arc::new(factory)).is_err() {
        panic!("memory factory registration failed");
    }
    (Arc::new(registry), paths)
}

fn drain(sync: &mut ReaderSynchronizer) -> usize {
    let mut total = 0;
    while !sync.end_of_file() {
        total += sync.next_packages().len();
    }
    total
}

// ── Benchmarks ──────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for readers in [1usize, 4, 16] {
        let per_reader = 20_000 / readers as u64;
        let (registry, paths) = make_registry(readers, per_reader);
        group.throughput(Throughput::Elements(per_reader * readers as u64));
        group.bench_function(format!("{readers}_readers"), |b| {
            b.iter_batched(
                || {
                    let mut sync = ReaderSynchronizer::new(
                        Arc::new(PlayerConfig::default()),
                        Arc::clone(&registry),
                    );
                    sync.open(&paths).expect("open memory recording");
                    sync
                },
                |mut sync| black_box(drain(&mut sync)),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer");
    const COUNT: u64 = 10_000;
    group.throughput(Throughput::Elements(COUNT));

    group.bench_function("push_pop_single_thread", |b| {
        let queue = BufferQueue::new(BufferLimits {
            max_bytes: u64::MAX,
            max_time_span: u64::MAX,
        });
        b.iter(|| {
            for ts in 0..COUNT {
                let _ = queue.try_push(Package::new(PackageHeader::new(ts), vec![0; 64]));
            }
            while let Some(package) = queue.try_pop() {
                black_box(package);
            }
        })
    });

    group.bench_function("producer_consumer_backpressure", |b| {
        b.iter(|| {
            let queue = Arc::new(BufferQueue::new(BufferLimits {
                max_bytes: 64 * 1024,
                max_time_span: 500,
            }));
            let producer = {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for ts in 0..COUNT {
                        if queue.push(Package::new(PackageHeader::new(ts), vec![0; 64])).is_err() {
                            break;
                        }
                    }
                    queue.set_end_of_file();
                })
            };
            let mut received = 0u64;
            loop {
                match queue.pop() {
                    (Some(package), _) => {
                        black_box(package);
                        received += 1;
                    }
                    (None, true) => break,
                    (None, false) => {}
                }
            }
            producer.join().expect("producer thread");
            assert_eq!(received, COUNT);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_buffer);
criterion_main!(benches);
