// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the acquire/release hot path at each layer of the stack.

use block_pool::{BlockPool, CorePool, PoolConfig, SizeClassRouter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_core_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("core_pool");
    for size in [256usize, 4096, 65536] {
        let pool = CorePool::with_system_substrate(size, 8, 8).unwrap();
        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, &size| {
            b.iter(|| {
                let h = pool.acquire(black_box(size), "bench").unwrap();
                pool.release(h).unwrap();
            })
        });
    }

    // Zero retention: every acquire is a substrate miss.
    let cold = CorePool::with_system_substrate(4096, 0, 0).unwrap();
    group.bench_function("miss/4096", |b| {
        b.iter(|| {
            let h = cold.acquire(black_box(4096), "bench").unwrap();
            cold.release(h).unwrap();
        })
    });
    group.finish();
}

fn bench_router(c: &mut Criterion) {
    let router =
        SizeClassRouter::with_system_substrate(&[64, 256, 1024, 4096, 16384, 65536], 4, 4).unwrap();
    c.bench_function("router/best_fit", |b| {
        let mut requested = 1usize;
        b.iter(|| {
            requested = requested * 7 % 65536 + 1;
            let h = router.acquire(black_box(requested), "bench").unwrap();
            router.release(h).unwrap();
        })
    });
}

fn bench_managed_stack(c: &mut Criterion) {
    let pool = PoolConfig::from_toml(
        r#"
size_classes = [512, 4096, 65536]
initial_count_per_class = 16
memory_budget = "64M"

[tuning]
min_capacity = 8
max_capacity = 512
"#,
    )
    .unwrap()
    .build()
    .unwrap();

    c.bench_function("managed/acquire_release_4096", |b| {
        b.iter(|| {
            let h = pool.acquire(black_box(4000), "bench").unwrap();
            pool.release(h).unwrap();
        })
    });
}

criterion_group!(benches, bench_core_pool, bench_router, bench_managed_stack);
criterion_main!(benches);
