//! Bounded ranking of the hardest triplets seen in one training pass.
//!
//! The pool is a min-heap keyed by `(hardness, sequence)`. The heap root is
//! always the weakest record, so admission and eviction are `O(log capacity)`.
//! `sequence` increases with every offer, which makes the later of two equally
//! hard records rank higher (LIFO tie-break) without depending on heap
//! iteration order.

use crate::data::Triplet;
use crate::error::{Result, TripmineError};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// One ranked observation held by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardRecord {
    pub triplet: Triplet,
    pub hardness: f32,
    /// Offer order within the current pass, starting at 0 after each clear.
    pub sequence: u64,
}

impl HardRecord {
    fn rank_cmp(&self, other: &Self) -> Ordering {
        self.hardness
            .total_cmp(&other.hardness)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Debug, Clone)]
struct Ranked(HardRecord);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

/// Fixed-capacity top-N structure over [`HardRecord`]s.
#[derive(Debug, Clone)]
pub struct HardPool {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked>>,
    next_sequence: u64,
}

impl HardPool {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TripmineError::config("hard pool capacity must be positive"));
        }
        Ok(Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity),
            next_sequence: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of offers since construction or the last [`clear`](Self::clear).
    pub fn offered(&self) -> u64 {
        self.next_sequence
    }

    /// The weakest record currently held, i.e. the next eviction candidate.
    pub fn weakest(&self) -> Option<&HardRecord> {
        self.heap.peek().map(|Reverse(Ranked(r))| r)
    }

    /// Offer a record. Returns `true` when it was admitted.
    ///
    /// When the pool is full the record displaces the weakest one if it ranks
    /// above it. A fresh record always carries the highest sequence, so it wins
    /// a hardness tie against the current weakest.
    pub fn offer(&mut self, triplet: Triplet, hardness: f32) -> bool {
        let record = HardRecord {
            triplet,
            hardness,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(Ranked(record)));
            return true;
        }

        let admit = match self.heap.peek() {
            Some(Reverse(Ranked(weakest))) => record.rank_cmp(weakest) == Ordering::Greater,
            None => true,
        };
        if admit {
            self.heap.pop();
            self.heap.push(Reverse(Ranked(record)));
        }
        admit
    }

    /// All held records, strongest first.
    pub fn ranked(&self) -> Vec<HardRecord> {
        // Sorting ascending over `Reverse` yields descending rank.
        self.heap
            .clone()
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(Ranked(r))| r)
            .collect()
    }

    /// Up to `n` triplets, strongest first.
    pub fn top_n(&self, n: usize) -> Vec<Triplet> {
        if n == 0 {
            return Vec::new();
        }
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked.into_iter().map(|r| r.triplet).collect()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(i: usize) -> Triplet {
        Triplet::new(i, i + 100, i + 200)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(HardPool::new(0), Err(TripmineError::Config(_))));
    }

    #[test]
    fn test_keeps_hardest_with_lifo_ties() {
        let mut pool = HardPool::new(4).unwrap();
        for (i, loss) in [0.1, 0.9, 0.3, 0.95, 0.2, 0.95].into_iter().enumerate() {
            pool.offer(t(i), loss);
        }

        let ranked = pool.ranked();
        let hardness: Vec<f32> = ranked.iter().map(|r| r.hardness).collect();
        assert_eq!(hardness, vec![0.95, 0.95, 0.9, 0.3]);
        assert_eq!(pool.top_n(4), vec![t(5), t(3), t(1), t(2)]);
    }

    #[test]
    fn test_tie_with_weakest_replaces_it() {
        let mut pool = HardPool::new(2).unwrap();
        pool.offer(t(0), 0.5);
        pool.offer(t(1), 0.2);
        assert!(pool.offer(t(2), 0.2));
        assert_eq!(pool.top_n(2), vec![t(0), t(2)]);
    }

    #[test]
    fn test_weaker_record_rejected_when_full() {
        let mut pool = HardPool::new(2).unwrap();
        pool.offer(t(0), 0.5);
        pool.offer(t(1), 0.4);
        assert!(!pool.offer(t(2), 0.1));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.weakest().map(|r| r.triplet), Some(t(1)));
    }

    #[test]
    fn test_top_n_shorter_than_pool() {
        let mut pool = HardPool::new(8).unwrap();
        pool.offer(t(0), 0.3);
        pool.offer(t(1), 0.7);
        assert_eq!(pool.top_n(1), vec![t(1)]);
        assert_eq!(pool.top_n(10), vec![t(1), t(0)]);
        assert!(pool.top_n(0).is_empty());
    }

    #[test]
    fn test_clear_restarts_sequence() {
        let mut pool = HardPool::new(3).unwrap();
        pool.offer(t(0), 1.0);
        pool.offer(t(1), 2.0);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.offered(), 0);
        pool.clear();
        assert!(pool.top_n(3).is_empty());
    }
}
