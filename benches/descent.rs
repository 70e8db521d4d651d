//! Descent construction benchmarks on synthetic blobs.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use akin::descent::{nn_descent, NndParams};
use akin::dist::{dense_self, Metric};
use akin::init::random_graph;

fn blob(n: usize, ndim: usize, seed: u64) -> Vec<f32> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n * ndim).map(|_| rng.random::<f32>() * 10.0).collect()
}

fn bench_build(c: &mut Criterion) {
    let n = 500;
    let ndim = 16;
    let k = 10;
    let data = blob(n, ndim, 1);

    c.bench_function("nn_descent/serial/n500_d16_k10", |b| {
        b.iter(|| {
            let distance = dense_self(Metric::Euclidean, data.clone(), ndim).unwrap();
            let mut rng = SmallRng::seed_from_u64(2);
            let init = random_graph(distance.as_ref(), k, false, &mut rng).unwrap();
            let out = nn_descent(distance.as_ref(), &init, &NndParams::default()).unwrap();
            black_box(out.graph.idx.len())
        })
    });

    c.bench_function("nn_descent/parallel/n500_d16_k10", |b| {
        b.iter(|| {
            let distance = dense_self(Metric::Euclidean, data.clone(), ndim).unwrap();
            let mut rng = SmallRng::seed_from_u64(2);
            let init = random_graph(distance.as_ref(), k, false, &mut rng).unwrap();
            let params = NndParams {
                n_threads: 4,
                ..NndParams::default()
            };
            let out = nn_descent(distance.as_ref(), &init, &params).unwrap();
            black_box(out.graph.idx.len())
        })
    });
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
