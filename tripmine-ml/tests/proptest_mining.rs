//! Property-based tests for mining, regeneration and kNN evaluation.

use proptest::prelude::*;
use std::sync::Arc;

use tripmine_ml::data::{Examples, Triplet, TripletDataset};
use tripmine_ml::knn::{knn_accuracy, pairwise_distances};
use tripmine_ml::mining::{HardNegativeSampler, HardPool, HardnessPolicy};

/// Expected top-`capacity` set over `(hardness, offer index)`, strongest first.
fn reference_ranking(hardness: &[f32], capacity: usize) -> Vec<(f32, usize)> {
    let mut all: Vec<(f32, usize)> = hardness.iter().copied().zip(0..).collect();
    all.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
    all.truncate(capacity);
    all
}

fn hardness_values() -> impl Strategy<Value = Vec<f32>> {
    // Few distinct values so ties are common.
    prop::collection::vec((0u8..6).prop_map(|v| f32::from(v) / 4.0), 0..80)
}

fn examples(classes: usize, per_class: usize) -> Arc<Examples> {
    let n = classes * per_class;
    let labels: Vec<usize> = (0..n).map(|i| i % classes).collect();
    let features: Vec<f32> = (0..n).map(|i| i as f32).collect();
    Arc::new(Examples::new(1, features, labels).unwrap())
}

// --- Hard pool properties ---

proptest! {
    #[test]
    fn pool_never_exceeds_capacity(
        capacity in 1usize..12,
        hardness in hardness_values(),
    ) {
        let mut pool = HardPool::new(capacity).unwrap();
        for (i, &h) in hardness.iter().enumerate() {
            pool.offer(Triplet::new(i, i, i), h);
            prop_assert!(pool.len() <= capacity);
        }
        prop_assert_eq!(pool.len(), hardness.len().min(capacity));
    }

    #[test]
    fn pool_ranking_is_non_increasing(
        capacity in 1usize..12,
        hardness in hardness_values(),
    ) {
        let mut pool = HardPool::new(capacity).unwrap();
        for (i, &h) in hardness.iter().enumerate() {
            pool.offer(Triplet::new(i, i, i), h);
        }
        let ranked = pool.ranked();
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].hardness >= pair[1].hardness);
            if pair[0].hardness == pair[1].hardness {
                prop_assert!(pair[0].sequence > pair[1].sequence);
            }
        }
    }

    #[test]
    fn top_n_is_exact_hardest_with_lifo_ties(
        capacity in 1usize..12,
        n in 0usize..16,
        hardness in hardness_values(),
    ) {
        let mut pool = HardPool::new(capacity).unwrap();
        for (i, &h) in hardness.iter().enumerate() {
            pool.offer(Triplet::new(i, i, i), h);
        }
        let expected: Vec<Triplet> = reference_ranking(&hardness, capacity)
            .into_iter()
            .take(n)
            .map(|(_, i)| Triplet::new(i, i, i))
            .collect();
        prop_assert_eq!(pool.top_n(n), expected);
    }

    #[test]
    fn sampler_reset_empties_top_n(
        hardness in hardness_values(),
        n in 1usize..20,
    ) {
        let mut sampler = HardNegativeSampler::new(3, 2)
            .unwrap()
            .with_policy(HardnessPolicy::ObservedLoss);
        let triplets: Vec<Triplet> = (0..hardness.len()).map(|i| Triplet::new(i, i, i)).collect();
        let zeros = vec![0.0; hardness.len()];
        sampler.sample_negatives(&zeros, &zeros, &hardness, &triplets).unwrap();
        prop_assert!(sampler.len() <= sampler.capacity());
        sampler.reset();
        prop_assert!(sampler.top_n(n).is_empty());
        prop_assert!(sampler.is_empty());
    }

    #[test]
    fn sampler_capacity_holds_across_batches(
        batches in prop::collection::vec(prop::collection::vec((0.0f32..3.0, 0.0f32..3.0), 0..20), 1..6),
    ) {
        let mut sampler = HardNegativeSampler::new(2, 3).unwrap();
        let mut offset = 0;
        for batch in &batches {
            let dist_ap: Vec<f32> = batch.iter().map(|b| b.0).collect();
            let dist_an: Vec<f32> = batch.iter().map(|b| b.1).collect();
            let triplets: Vec<Triplet> =
                (offset..offset + batch.len()).map(|i| Triplet::new(i, i, i)).collect();
            offset += batch.len();
            sampler.sample_negatives(&dist_ap, &dist_an, &dist_ap, &triplets).unwrap();
            prop_assert!(sampler.len() <= 6);
        }
    }
}

// --- Regeneration properties ---

proptest! {
    #[test]
    fn regeneration_has_exact_size_and_hard_prefix(
        classes in 2usize..5,
        per_class in 2usize..5,
        total in 1usize..60,
        hard_frac in 0.0f64..=1.0,
        seed in any::<u64>(),
        losses in prop::collection::vec(0.0f32..2.0, 1..40),
    ) {
        let mut dataset = TripletDataset::new(examples(classes, per_class), 40, seed).unwrap();
        let mut sampler = HardNegativeSampler::new(classes, 2)
            .unwrap()
            .with_policy(HardnessPolicy::ObservedLoss);
        let seen: Vec<Triplet> = dataset.snapshot().iter().take(losses.len()).copied().collect();
        let zeros = vec![0.0; seen.len()];
        sampler
            .sample_negatives(&zeros, &zeros, &losses[..seen.len()], &seen)
            .unwrap();

        let hard_count = (total as f64 * hard_frac).floor() as usize;
        let expected_hard = sampler.top_n(hard_count);
        prop_assert_eq!(expected_hard.len(), hard_count.min(sampler.len()));

        let before = dataset.version();
        let snapshot = dataset
            .regenerate_triplet_list(total, &sampler, hard_count)
            .unwrap();
        prop_assert_eq!(snapshot.len(), total);
        prop_assert_eq!(snapshot.version(), before + 1);
        prop_assert_eq!(&snapshot.triplets()[..expected_hard.len()], &expected_hard[..]);
        for t in snapshot.iter() {
            prop_assert!(dataset.is_valid(t), "invalid triplet {}", t);
        }
        // The dataset never resets the sampler itself.
        prop_assert_eq!(sampler.top_n(hard_count), expected_hard);
    }

    #[test]
    fn regeneration_rejects_more_hard_than_total(
        total in 1usize..20,
        extra in 1usize..5,
    ) {
        let mut dataset = TripletDataset::new(examples(3, 3), 10, 0).unwrap();
        let sampler = HardNegativeSampler::new(3, 1).unwrap();
        prop_assert!(dataset.regenerate_triplet_list(total, &sampler, total + extra).is_err());
        prop_assert_eq!(dataset.version(), 0);
    }
}

// --- kNN properties ---

fn point_set(max_points: usize, max_dim: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    (1..=max_dim).prop_flat_map(move |dim| {
        prop::collection::vec(prop::collection::vec(-10.0f32..10.0, dim), 1..=max_points)
    })
}

proptest! {
    #[test]
    fn knn_self_reference_is_perfect(
        points in point_set(20, 6),
        classes in 1usize..5,
    ) {
        // Offset the first coordinate so no two points coincide.
        let points: Vec<Vec<f32>> = points
            .into_iter()
            .enumerate()
            .map(|(i, mut p)| {
                p[0] += 100.0 * i as f32;
                p
            })
            .collect();
        let labels: Vec<usize> = (0..points.len()).map(|i| i % classes).collect();
        let acc = knn_accuracy(&points, &points, &labels, &labels, 1).unwrap();
        prop_assert_eq!(acc, 1.0);
    }

    #[test]
    fn expansion_matches_direct_distance(
        (a, b) in (1usize..8).prop_flat_map(|dim| (
            prop::collection::vec(prop::collection::vec(-10.0f32..10.0, dim), 1..10),
            prop::collection::vec(prop::collection::vec(-10.0f32..10.0, dim), 1..10),
        )),
    ) {
        let d = pairwise_distances(&a, &b).unwrap();
        for (i, x) in a.iter().enumerate() {
            for (j, y) in b.iter().enumerate() {
                let direct = x
                    .iter()
                    .zip(y)
                    .map(|(&p, &q)| (f64::from(p) - f64::from(q)).powi(2))
                    .sum::<f64>()
                    .sqrt();
                prop_assert!(d[i][j] >= 0.0);
                prop_assert!((d[i][j] - direct).abs() < 1e-5, "{} vs {}", d[i][j], direct);
            }
        }
    }
}
