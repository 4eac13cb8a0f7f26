//! Triplet identities and immutable triplet snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An (anchor, positive, negative) tuple of example ids.
///
/// Anchor and positive share a class; the negative comes from another class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triplet {
    pub anchor: usize,
    pub positive: usize,
    pub negative: usize,
}

impl Triplet {
    pub fn new(anchor: usize, positive: usize, negative: usize) -> Self {
        Self {
            anchor,
            positive,
            negative,
        }
    }

    /// Largest id referenced by this triplet.
    pub fn max_id(&self) -> usize {
        self.anchor.max(self.positive).max(self.negative)
    }
}

impl fmt::Display for Triplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.anchor, self.positive, self.negative)
    }
}

impl From<(usize, usize, usize)> for Triplet {
    fn from((anchor, positive, negative): (usize, usize, usize)) -> Self {
        Self::new(anchor, positive, negative)
    }
}

/// A frozen triplet list for one regeneration window.
///
/// Regeneration never mutates a snapshot; it publishes a new one with the next
/// version, so a pass that holds an `Arc<TripletSnapshot>` keeps seeing the
/// list it started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripletSnapshot {
    version: u64,
    triplets: Vec<Triplet>,
}

impl TripletSnapshot {
    pub fn new(version: u64, triplets: Vec<Triplet>) -> Self {
        Self { version, triplets }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn triplets(&self) -> &[Triplet] {
        &self.triplets
    }

    pub fn len(&self) -> usize {
        self.triplets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triplets.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Triplet> {
        self.triplets.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Triplet> {
        self.triplets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triplet_display_and_max() {
        let t = Triplet::new(4, 9, 2);
        assert_eq!(t.to_string(), "(4, 9, 2)");
        assert_eq!(t.max_id(), 9);
        assert_eq!(Triplet::from((4, 9, 2)), t);
    }

    #[test]
    fn test_snapshot_accessors() {
        let snap = TripletSnapshot::new(2, vec![Triplet::new(0, 1, 2), Triplet::new(3, 4, 5)]);
        assert_eq!(snap.version(), 2);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(1), Some(&Triplet::new(3, 4, 5)));
        assert!(snap.get(2).is_none());
        assert_eq!(snap.iter().count(), 2);
    }
}
