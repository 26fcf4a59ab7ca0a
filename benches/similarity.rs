//! Cosine similarity benchmarks at embedding dimensionality.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hephaestus::services::{batch_similarities, cosine_similarity};

const DIM: usize = 1536;

fn make_vector(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..DIM)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f32 / u32::MAX as f32) - 0.5
        })
        .collect()
}

fn bench_single(c: &mut Criterion) {
    let a = make_vector(1);
    let b = make_vector(2);
    c.bench_function("cosine_single_1536", |bench| {
        bench.iter(|| black_box(cosine_similarity(&a, &b)));
    });
}

fn bench_batch(c: &mut Criterion) {
    let query = make_vector(1);
    let mut group = c.benchmark_group("cosine_batch_1536");
    for size in [10usize, 100, 1000] {
        let embeddings: Vec<Vec<f32>> = (0..size as u64).map(make_vector).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &embeddings, |b, emb| {
            b.iter(|| black_box(batch_similarities(&query, emb)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single, bench_batch);
criterion_main!(benches);
