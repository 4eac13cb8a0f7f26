//! k-nearest-neighbour evaluation of learned embeddings.
//!
//! Distances use the expansion `‖a‖² + ‖b‖² − 2·a·b` so reference norms are
//! computed once, accumulated in `f64` and clamped at zero before the square
//! root. Neighbour selection is stable (reference order breaks distance ties)
//! and the vote picks the smallest label among the most frequent.

use crate::error::{Result, TripmineError};
use std::collections::BTreeMap;

fn check_rows(name: &str, rows: &[Vec<f32>]) -> Result<usize> {
    let dim = rows
        .first()
        .map(Vec::len)
        .ok_or_else(|| TripmineError::shape(format!("{name} embeddings are empty")))?;
    if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
        return Err(TripmineError::shape(format!(
            "{name} embedding {i} has dimension {} but embedding 0 has {dim}",
            r.len()
        )));
    }
    Ok(dim)
}

fn sq_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum()
}

fn dot64(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum()
}

/// Euclidean distance matrix, `test.len()` rows by `reference.len()` columns.
pub fn pairwise_distances(test: &[Vec<f32>], reference: &[Vec<f32>]) -> Result<Vec<Vec<f64>>> {
    let dim_t = check_rows("test", test)?;
    let dim_r = check_rows("reference", reference)?;
    if dim_t != dim_r {
        return Err(TripmineError::shape(format!(
            "test embeddings have dimension {dim_t}, reference embeddings {dim_r}"
        )));
    }

    let ref_sq: Vec<f64> = reference.iter().map(|r| sq_norm(r)).collect();
    Ok(test
        .iter()
        .map(|t| {
            let t_sq = sq_norm(t);
            reference
                .iter()
                .zip(&ref_sq)
                .map(|(r, &r_sq)| (t_sq + r_sq - 2.0 * dot64(t, r)).max(0.0).sqrt())
                .collect()
        })
        .collect())
}

/// Indices of the `k` smallest entries, nearest first, ties by index.
fn nearest(distances: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..distances.len()).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
    order.truncate(k);
    order
}

/// Most frequent label; the smallest one wins a tie.
fn majority(labels: impl Iterator<Item = usize>) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    let mut best: Option<(usize, usize)> = None;
    for (label, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

/// Majority-vote classifier over a fixed reference set.
#[derive(Debug, Clone)]
pub struct KnnClassifier<'a> {
    reference: &'a [Vec<f32>],
    labels: &'a [usize],
    k: usize,
}

impl<'a> KnnClassifier<'a> {
    pub fn new(reference: &'a [Vec<f32>], labels: &'a [usize], k: usize) -> Result<Self> {
        if k == 0 {
            return Err(TripmineError::config("k must be positive"));
        }
        check_rows("reference", reference)?;
        if labels.len() != reference.len() {
            return Err(TripmineError::shape(format!(
                "{} reference embeddings but {} labels",
                reference.len(),
                labels.len()
            )));
        }
        if k > reference.len() {
            return Err(TripmineError::config(format!(
                "k = {k} exceeds the {} reference embeddings",
                reference.len()
            )));
        }
        Ok(Self {
            reference,
            labels,
            k,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Predicted label for every test embedding.
    pub fn predict(&self, test: &[Vec<f32>]) -> Result<Vec<usize>> {
        let distances = pairwise_distances(test, self.reference)?;
        distances
            .iter()
            .map(|row| {
                let picked = nearest(row, self.k);
                majority(picked.into_iter().map(|j| self.labels[j]))
                    .ok_or_else(|| TripmineError::training("kNN vote over no neighbours"))
            })
            .collect()
    }

    /// Fraction of test embeddings whose predicted label matches.
    pub fn accuracy(&self, test: &[Vec<f32>], test_labels: &[usize]) -> Result<f64> {
        if test.len() != test_labels.len() {
            return Err(TripmineError::shape(format!(
                "{} test embeddings but {} labels",
                test.len(),
                test_labels.len()
            )));
        }
        let predicted = self.predict(test)?;
        let hits = predicted
            .iter()
            .zip(test_labels)
            .filter(|(p, y)| p == y)
            .count();
        Ok(hits as f64 / test.len() as f64)
    }
}

/// Classify `test` against `reference` and report the accuracy.
pub fn knn_accuracy(
    test: &[Vec<f32>],
    reference: &[Vec<f32>],
    test_labels: &[usize],
    reference_labels: &[usize],
    k: usize,
) -> Result<f64> {
    KnnClassifier::new(reference, reference_labels, k)?.accuracy(test, test_labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances_match_direct() {
        let a = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let b = vec![vec![3.0, 4.0], vec![1.0, 1.0]];
        let d = pairwise_distances(&a, &b).unwrap();
        assert!((d[0][0] - 5.0).abs() < 1e-9);
        assert!((d[0][1] - 2f64.sqrt()).abs() < 1e-9);
        assert_eq!(d[1][1], 0.0);
    }

    #[test]
    fn test_self_distance_never_nan() {
        let v = vec![vec![0.1f32, 0.7, 1e-3, 12345.678]];
        let d = pairwise_distances(&v, &v).unwrap();
        assert!(d[0][0].is_finite());
        assert!(d[0][0] >= 0.0);
    }

    #[test]
    fn test_self_reference_is_perfect() {
        let x = vec![vec![0.0, 0.0], vec![5.0, 5.0], vec![0.0, 6.0], vec![9.0, 1.0]];
        let y = vec![0, 1, 2, 1];
        assert_eq!(knn_accuracy(&x, &x, &y, &y, 1).unwrap(), 1.0);
    }

    #[test]
    fn test_majority_vote() {
        let reference = vec![vec![0.0], vec![0.1], vec![0.2], vec![10.0]];
        let labels = vec![1, 1, 0, 0];
        let knn = KnnClassifier::new(&reference, &labels, 3).unwrap();
        assert_eq!(knn.predict(&[vec![0.05]]).unwrap(), vec![1]);
    }

    #[test]
    fn test_vote_tie_goes_to_smallest_label() {
        let reference = vec![vec![0.0], vec![1.0]];
        let labels = vec![7, 3];
        let knn = KnnClassifier::new(&reference, &labels, 2).unwrap();
        assert_eq!(knn.predict(&[vec![0.0]]).unwrap(), vec![3]);
    }

    #[test]
    fn test_distance_tie_uses_reference_order() {
        let reference = vec![vec![-1.0], vec![1.0]];
        let labels = vec![4, 2];
        let knn = KnnClassifier::new(&reference, &labels, 1).unwrap();
        assert_eq!(knn.predict(&[vec![0.0]]).unwrap(), vec![4]);
    }

    #[test]
    fn test_invalid_arguments() {
        let x = vec![vec![0.0, 1.0]];
        let y = vec![0];
        assert!(matches!(
            knn_accuracy(&x, &x, &y, &y, 0),
            Err(TripmineError::Config(_))
        ));
        assert!(matches!(
            knn_accuracy(&x, &x, &y, &y, 2),
            Err(TripmineError::Config(_))
        ));
        assert!(matches!(
            knn_accuracy(&x, &x, &y, &[0, 1], 1),
            Err(TripmineError::Shape(_))
        ));
        assert!(matches!(
            knn_accuracy(&[vec![0.0]], &x, &y, &y, 1),
            Err(TripmineError::Shape(_))
        ));
        assert!(matches!(
            knn_accuracy(&[], &x, &[], &y, 1),
            Err(TripmineError::Shape(_))
        ));
    }

    #[test]
    fn test_accuracy_fraction() {
        let reference = vec![vec![0.0], vec![10.0]];
        let labels = vec![0, 1];
        let test = vec![vec![1.0], vec![9.0], vec![2.0], vec![8.0]];
        let acc = knn_accuracy(&test, &reference, &[0, 1, 1, 1], &labels, 1).unwrap();
        assert!((acc - 0.75).abs() < 1e-12);
    }
}
