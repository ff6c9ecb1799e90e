//! Benchmarks for graph construction and the merge loop.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ndarray::{ArrayD, IxDyn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use granita_core::RagBuilder;

/// A synthetic over-segmentation: a grid of supervoxel tiles with noisy
/// probabilities, low inside coarse objects and high between them.
fn synthetic_volume(side: usize) -> (ArrayD<u32>, ArrayD<f32>) {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut labels = ArrayD::zeros(IxDyn(&[side, side]));
    let mut probabilities = ArrayD::zeros(IxDyn(&[side, side]));
    let tile = 4;
    let tiles_per_row = side.div_ceil(tile);
    for row in 0..side {
        for column in 0..side {
            let supervoxel = 1 + (row / tile) * tiles_per_row + column / tile;
            labels[IxDyn(&[row, column])] = supervoxel as u32;
            let object_boundary = (row / 16) != ((row + 1) / 16);
            let base: f32 = if object_boundary { 0.8 } else { 0.2 };
            probabilities[IxDyn(&[row, column])] = base + rng.gen_range(-0.05..0.05);
        }
    }
    (labels, probabilities)
}

fn bench_build(c: &mut Criterion) {
    let (labels, probabilities) = synthetic_volume(128);
    c.bench_function("rag_build_128x128", |b| {
        b.iter(|| {
            let rag = RagBuilder::new()
                .build(black_box(&labels), black_box(&probabilities))
                .expect("volume is valid");
            black_box(rag.num_edges())
        });
    });
}

fn bench_agglomerate(c: &mut Criterion) {
    let (labels, probabilities) = synthetic_volume(128);
    c.bench_function("agglomerate_128x128", |b| {
        b.iter(|| {
            let mut rag = RagBuilder::new()
                .build(&labels, &probabilities)
                .expect("volume is valid");
            rag.agglomerate(black_box(0.5)).expect("agglomeration succeeds");
            black_box(rag.num_nodes())
        });
    });
}

criterion_group!(benches, bench_build, bench_agglomerate);
criterion_main!(benches);
