//! Heap benchmarks: locked versus thread-private free lists.

use bfmalloc_core::{HeapConfig, HeapSegment, LockedHeap, MAX_SEGMENT_LIMIT, ThreadHeap};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

fn config() -> HeapConfig {
    HeapConfig::default().with_heap_limit(64 * 1024 * 1024)
}

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        let locked = LockedHeap::with_config(config());
        group.bench_with_input(BenchmarkId::new("locked", size), &size, |b, &sz| {
            b.iter(|| {
                let p = locked.allocate(sz).unwrap();
                locked.deallocate(criterion::black_box(p)).unwrap();
            });
        });

        let private = ThreadHeap::with_config(config());
        group.bench_with_input(BenchmarkId::new("thread", size), &size, |b, &sz| {
            b.iter(|| {
                let p = private.allocate(sz).unwrap();
                private.deallocate(criterion::black_box(p)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    let locked = LockedHeap::with_config(config());
    group.bench_function("locked_1000x64B", |b| {
        b.iter(|| {
            let ptrs: Vec<usize> = (0..1000).map(|_| locked.allocate(64).unwrap()).collect();
            for p in criterion::black_box(ptrs) {
                locked.deallocate(p).unwrap();
            }
        });
    });

    let private = ThreadHeap::with_config(config());
    group.bench_function("thread_1000x64B", |b| {
        b.iter(|| {
            let ptrs: Vec<usize> = (0..1000).map(|_| private.allocate(64).unwrap()).collect();
            for p in criterion::black_box(ptrs) {
                private.deallocate(p).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_4_threads");
    group.sample_size(20);

    let locked = Arc::new(LockedHeap::with_config(config()));
    group.bench_function("locked", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let heap = Arc::clone(&locked);
                    thread::spawn(move || {
                        for _ in 0..256 {
                            let p = heap.allocate(128).unwrap();
                            heap.deallocate(p).unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    });

    // Thread heaps are rebuilt per iteration; each leaves one block behind in
    // the shared segment, so the segment is sized for the whole run.
    let segment = Arc::new(HeapSegment::with_capacity(MAX_SEGMENT_LIMIT));
    group.bench_function("thread", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let segment = Arc::clone(&segment);
                    thread::spawn(move || {
                        let heap = ThreadHeap::new(segment, config());
                        for _ in 0..256 {
                            let p = heap.allocate(128).unwrap();
                            heap.deallocate(p).unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_contended
);
criterion_main!(benches);
