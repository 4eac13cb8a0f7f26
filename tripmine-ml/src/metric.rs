//! Vector distances and triplet scoring primitives.

use crate::error::{Result, TripmineError};

/// Dot product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Squared L2 norm.
pub fn norm_squared(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

/// Euclidean distance between two equal-length slices.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Per-example triplet hinge: `max(0, margin - (dist_an - dist_ap))`.
///
/// Zero once the negative sits at least `margin` further from the anchor than
/// the positive does.
pub fn margin_violation(dist_ap: f32, dist_an: f32, margin: f32) -> f32 {
    (margin - (dist_an - dist_ap)).max(0.0)
}

/// Whether a triplet is ranked correctly: `dist_an - dist_ap > margin`.
pub fn triplet_correct(dist_ap: f32, dist_an: f32, margin: f32) -> bool {
    dist_an - dist_ap - margin > 0.0
}

/// Per-example correctness for a batch of distances.
pub fn triplet_correctness(dist_ap: &[f32], dist_an: &[f32], margin: f32) -> Result<Vec<bool>> {
    if dist_ap.len() != dist_an.len() {
        return Err(TripmineError::shape(format!(
            "dist_ap has {} entries but dist_an has {}",
            dist_ap.len(),
            dist_an.len()
        )));
    }
    Ok(dist_ap
        .iter()
        .zip(dist_an)
        .map(|(&ap, &an)| triplet_correct(ap, an, margin))
        .collect())
}

/// Fraction of correctly ranked triplets. An empty batch scores 0.
pub fn triplet_accuracy(dist_ap: &[f32], dist_an: &[f32], margin: f32) -> Result<f64> {
    let correct = triplet_correctness(dist_ap, dist_an, margin)?;
    if correct.is_empty() {
        return Ok(0.0);
    }
    let hits = correct.iter().filter(|&&c| c).count();
    Ok(hits as f64 / correct.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_distance() {
        assert!((l2_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(l2_distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_margin_violation() {
        assert!((margin_violation(0.5, 0.3, 0.2) - 0.4).abs() < 1e-6);
        assert_eq!(margin_violation(0.1, 0.9, 0.2), 0.0);
    }

    #[test]
    fn test_accuracy_mixed_batch() {
        let correct = triplet_correctness(&[0.5, 0.2], &[0.3, 0.6], 0.0).unwrap();
        assert_eq!(correct, vec![false, true]);
        let acc = triplet_accuracy(&[0.5, 0.2], &[0.3, 0.6], 0.0).unwrap();
        assert!((acc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_tie_is_incorrect() {
        assert!(!triplet_correct(0.4, 0.4, 0.0));
    }

    #[test]
    fn test_accuracy_length_mismatch() {
        let err = triplet_accuracy(&[0.1, 0.2], &[0.3], 0.0).unwrap_err();
        assert!(matches!(err, TripmineError::Shape(_)));
    }
}
