//! Shuffled mini-batches over a triplet snapshot.

use super::triplet::{Triplet, TripletSnapshot};
use crate::error::{Result, TripmineError};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Produces one epoch of batches at a time from a snapshot.
#[derive(Debug, Clone)]
pub struct TripletLoader {
    batch_size: usize,
    shuffle: bool,
    rng: ChaCha8Rng,
}

impl TripletLoader {
    pub fn new(batch_size: usize, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(TripmineError::config("batch size must be positive"));
        }
        Ok(Self {
            batch_size,
            shuffle: true,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Keep snapshot order instead of shuffling every epoch.
    #[must_use]
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches an epoch over `snapshot` yields.
    pub fn num_batches(&self, snapshot: &TripletSnapshot) -> usize {
        snapshot.len().div_ceil(self.batch_size)
    }

    /// Batches for one pass. The iterator keeps its own handle on the snapshot.
    pub fn epoch(&mut self, snapshot: Arc<TripletSnapshot>) -> EpochBatches {
        let mut order: Vec<usize> = (0..snapshot.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        EpochBatches {
            snapshot,
            order,
            cursor: 0,
            batch_size: self.batch_size,
        }
    }
}

/// Iterator over the batches of a single epoch.
#[derive(Debug)]
pub struct EpochBatches {
    snapshot: Arc<TripletSnapshot>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
}

impl EpochBatches {
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.version()
    }
}

impl Iterator for EpochBatches {
    type Item = Vec<Triplet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end]
            .iter()
            .map(|&i| self.snapshot.triplets()[i])
            .collect();
        self.cursor = end;
        Some(batch)
    }
}
