use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vesper::hnsw::{DistanceMetric, HnswConfig, HnswIndex};

fn pseudo_vector(state: &mut u64, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|_| {
            *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((*state >> 40) as f32 / 16777216.0) - 0.5
        })
        .collect()
}

fn bench_search(c: &mut Criterion) {
    let dim = 128;
    let mut config = HnswConfig::default();
    config.seed = 42;
    let index = HnswIndex::new(dim, DistanceMetric::Cosine, config).unwrap();

    let mut state = 1u64;
    for _ in 0..10_000 {
        index
            .insert(pseudo_vector(&mut state, dim), None, HashMap::new())
            .unwrap();
    }

    let query = pseudo_vector(&mut state, dim);
    c.bench_function("search_top10_10k_128d", |b| {
        b.iter(|| index.search(black_box(&query), 10, None).unwrap())
    });

    let queries: Vec<Vec<f32>> = (0..64).map(|_| pseudo_vector(&mut state, dim)).collect();
    c.bench_function("batch_search_64q_top10", |b| {
        b.iter(|| index.batch_search(black_box(&queries), 10, None).unwrap())
    });
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
