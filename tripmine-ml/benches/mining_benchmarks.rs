use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tripmine_ml::data::{Examples, Triplet, TripletDataset};
use tripmine_ml::knn::{knn_accuracy, pairwise_distances};
use tripmine_ml::mining::HardNegativeSampler;

fn random_rows(rng: &mut ChaCha8Rng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn bench_sampler(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let batch = 64;
    let dist_ap: Vec<f32> = (0..batch).map(|_| rng.gen_range(0.0..2.0)).collect();
    let dist_an: Vec<f32> = (0..batch).map(|_| rng.gen_range(0.0..2.0)).collect();
    let losses: Vec<f32> = dist_ap
        .iter()
        .zip(&dist_an)
        .map(|(ap, an)| (0.2 - (an - ap)).max(0.0))
        .collect();
    let triplets: Vec<Triplet> = (0..batch).map(|i| Triplet::new(i, i + 1, i + 2)).collect();

    c.bench_function("sampler_sample_negatives_batch64", |b| {
        let mut sampler = HardNegativeSampler::new(10, 5).unwrap();
        b.iter(|| {
            sampler
                .sample_negatives(
                    black_box(&dist_ap),
                    black_box(&dist_an),
                    black_box(&losses),
                    black_box(&triplets),
                )
                .unwrap()
        })
    });

    c.bench_function("sampler_epoch_then_top_n", |b| {
        b.iter(|| {
            let mut sampler = HardNegativeSampler::new(10, 5).unwrap();
            for _ in 0..5 {
                sampler
                    .sample_negatives(&dist_ap, &dist_an, &losses, &triplets)
                    .unwrap();
            }
            let top = sampler.top_n(black_box(32));
            sampler.reset();
            top
        })
    });
}

fn bench_regeneration(c: &mut Criterion) {
    let labels: Vec<usize> = (0..1000).map(|i| i % 10).collect();
    let features: Vec<f32> = (0..1000).map(|i| i as f32).collect();
    let examples = Arc::new(Examples::new(1, features, labels).unwrap());
    let mut dataset = TripletDataset::new(examples, 640, 1).unwrap();
    let mut sampler = HardNegativeSampler::new(10, 10).unwrap();
    let seen: Vec<Triplet> = dataset.snapshot().iter().copied().collect();
    let zeros = vec![0.0; seen.len()];
    let ones = vec![1.0; seen.len()];
    sampler.sample_negatives(&ones, &zeros, &ones, &seen).unwrap();

    c.bench_function("regenerate_640_with_64_hard", |b| {
        b.iter(|| {
            dataset
                .regenerate_triplet_list(black_box(640), &sampler, black_box(64))
                .unwrap()
        })
    });
}

fn bench_knn(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let reference = random_rows(&mut rng, 1000, 10);
    let test = random_rows(&mut rng, 100, 10);
    let reference_labels: Vec<usize> = (0..1000).map(|i| i % 10).collect();
    let test_labels: Vec<usize> = (0..100).map(|i| i % 10).collect();

    c.bench_function("knn_pairwise_100x1000_dim10", |b| {
        b.iter(|| pairwise_distances(black_box(&test), black_box(&reference)).unwrap())
    });

    c.bench_function("knn_accuracy_k1", |b| {
        b.iter(|| {
            knn_accuracy(&test, &reference, &test_labels, &reference_labels, black_box(1)).unwrap()
        })
    });

    c.bench_function("knn_accuracy_k5", |b| {
        b.iter(|| {
            knn_accuracy(&test, &reference, &test_labels, &reference_labels, black_box(5)).unwrap()
        })
    });
}

criterion_group!(benches, bench_sampler, bench_regeneration, bench_knn);
criterion_main!(benches);
