//! Labelled example store: a row-major feature matrix plus class labels.

use crate::error::{Result, TripmineError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fixed-dimension feature rows, each tagged with a class label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Examples {
    dim: usize,
    features: Vec<f32>,
    labels: Vec<usize>,
}

impl Examples {
    pub fn new(dim: usize, features: Vec<f32>, labels: Vec<usize>) -> Result<Self> {
        if dim == 0 {
            return Err(TripmineError::dataset("feature dimension must be positive"));
        }
        if features.len() != dim * labels.len() {
            return Err(TripmineError::shape(format!(
                "{} feature values do not form {} rows of dimension {dim}",
                features.len(),
                labels.len()
            )));
        }
        Ok(Self {
            dim,
            features,
            labels,
        })
    }

    /// Build from owned rows. Every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>, labels: Vec<usize>) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if rows.len() != labels.len() {
            return Err(TripmineError::shape(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(TripmineError::shape(format!(
                "row {i} has dimension {} but row 0 has {dim}",
                row.len()
            )));
        }
        Self::new(dim, rows.into_iter().flatten().collect(), labels)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.labels.len() {
            return None;
        }
        let start = index * self.dim;
        Some(&self.features[start..start + self.dim])
    }

    pub fn label(&self, index: usize) -> Option<usize> {
        self.labels.get(index).copied()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.features.chunks_exact(self.dim)
    }

    /// Example ids grouped by label, labels ascending, ids in store order.
    pub fn by_class(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (id, &label) in self.labels.iter().enumerate() {
            groups.entry(label).or_default().push(id);
        }
        groups
    }

    /// A new store holding only the given ids, in the given order.
    pub fn subset(&self, ids: &[usize]) -> Result<Self> {
        let mut features = Vec::with_capacity(ids.len() * self.dim);
        let mut labels = Vec::with_capacity(ids.len());
        for &id in ids {
            let row = self.row(id).ok_or_else(|| {
                TripmineError::dataset(format!("example {id} out of range ({})", self.len()))
            })?;
            features.extend_from_slice(row);
            labels.push(self.labels[id]);
        }
        Self::new(self.dim, features, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Examples {
        Examples::from_rows(
            vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]],
            vec![1, 0, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_rows_and_labels() {
        let ex = sample();
        assert_eq!(ex.dim(), 2);
        assert_eq!(ex.len(), 3);
        assert_eq!(ex.row(1), Some(&[2.0, 3.0][..]));
        assert_eq!(ex.row(3), None);
        assert_eq!(ex.label(2), Some(1));
        assert_eq!(ex.rows().count(), 3);
    }

    #[test]
    fn test_by_class() {
        let groups = sample().by_class();
        assert_eq!(groups.get(&0), Some(&vec![1]));
        assert_eq!(groups.get(&1), Some(&vec![0, 2]));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = Examples::from_rows(vec![vec![0.0, 1.0], vec![2.0]], vec![0, 1]).unwrap_err();
        assert!(matches!(err, TripmineError::Shape(_)));
    }

    #[test]
    fn test_label_count_mismatch() {
        assert!(Examples::new(2, vec![0.0; 4], vec![0]).is_err());
    }

    #[test]
    fn test_subset() {
        let sub = sample().subset(&[2, 1]).unwrap();
        assert_eq!(sub.labels(), &[1, 0]);
        assert_eq!(sub.row(0), Some(&[4.0, 5.0][..]));
        assert!(sample().subset(&[7]).is_err());
    }
}
