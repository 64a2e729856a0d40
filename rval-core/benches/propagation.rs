//! # Propagation Benchmarks
//!
//! Cost of settling writes through warm derivation graphs.
//!
//! Run with: `cargo bench -p rval-core`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rval_core::{subscribe, transact, Cell, Derived, Subscription};
use std::hint::black_box;

/// One cell feeding `width` derivations that all feed a single tip.
fn create_diamond(width: usize) -> (Cell<u64>, Derived<u64>, Subscription) {
    let source = Cell::new(0_u64);
    let branches: Vec<Derived<u64>> = (0..width as u64)
        .map(|i| {
            let source = source.clone();
            Derived::new(move || source.get().wrapping_mul(i + 1))
        })
        .collect();
    let tip = Derived::try_new(move || {
        branches
            .iter()
            .try_fold(0_u64, |acc, b| -> rval_core::Result<u64> {
                Ok(acc.wrapping_add(b.get()?))
            })
    });
    let sub = subscribe(&tip, |v: &u64| {
        black_box(*v);
    })
    .expect("subscribe");
    (source, tip, sub)
}

/// A chain of `depth` derivations, each adding one to the previous.
fn create_chain(depth: usize) -> (Cell<u64>, Vec<Derived<u64>>, Subscription) {
    let source = Cell::new(0_u64);
    let mut chain: Vec<Derived<u64>> = Vec::with_capacity(depth);
    for i in 0..depth {
        let next = if i == 0 {
            let source = source.clone();
            Derived::new(move || source.get() + 1)
        } else {
            let prev = chain[i - 1].clone();
            Derived::try_new(move || Ok(prev.get()? + 1))
        };
        chain.push(next);
    }
    let sub = subscribe(chain.last().expect("non-empty chain"), |v: &u64| {
        black_box(*v);
    })
    .expect("subscribe");
    (source, chain, sub)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_diamond_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamond_fan_out");

    for width in [10, 100, 1000].iter() {
        let (source, tip, _sub) = create_diamond(*width);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(next).expect("set");
                black_box(tip.get().expect("get"))
            });
        });
    }

    group.finish();
}

fn bench_chain_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_depth");

    for depth in [10, 100, 500].iter() {
        let (source, chain, _sub) = create_chain(*depth);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| {
                next += 1;
                source.set(next).expect("set");
                black_box(chain.len())
            });
        });
    }

    group.finish();
}

fn bench_batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for writes in [1, 10, 100].iter() {
        let (source, _tip, _sub) = create_diamond(100);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(writes), writes, |b, &writes| {
            b.iter(|| {
                transact(|| {
                    for _ in 0..writes {
                        next += 1;
                        source.set(next).expect("set");
                    }
                })
                .expect("transact")
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_diamond_fan_out,
    bench_chain_depth,
    bench_batched_writes
);
criterion_main!(benches);
