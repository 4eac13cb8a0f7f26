//! Triplet dataset with hard-negative regeneration.
//!
//! The dataset owns a handle to the current [`TripletSnapshot`]. Regeneration
//! harvests the sampler's hardest triplets, tops the list up with freshly drawn
//! ones and publishes a new snapshot. The previous snapshot stays valid for
//! anyone still holding it.

use super::examples::Examples;
use super::triplet::{Triplet, TripletSnapshot};
use crate::error::{Result, TripmineError};
use crate::mining::HardNegativeSampler;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Feature rows for one triplet, borrowed from the example store.
#[derive(Debug, Clone, Copy)]
pub struct TripletSample<'a> {
    pub triplet: Triplet,
    pub anchor: &'a [f32],
    pub positive: &'a [f32],
    pub negative: &'a [f32],
}

/// Class membership used for fresh sampling.
#[derive(Debug, Clone)]
struct ClassIndex {
    labels: Vec<usize>,
    members: Vec<Vec<usize>>,
    /// Positions into `labels` whose class can supply an anchor/positive pair.
    anchor_slots: Vec<usize>,
}

impl ClassIndex {
    fn build(examples: &Examples, class_limit: Option<usize>) -> Result<Self> {
        let mut groups: BTreeMap<usize, Vec<usize>> = examples.by_class();
        if let Some(limit) = class_limit {
            if limit < 2 {
                return Err(TripmineError::config(format!(
                    "triplets need at least 2 classes, limit was {limit}"
                )));
            }
            groups = groups.into_iter().take(limit).collect();
        }

        let (labels, members): (Vec<usize>, Vec<Vec<usize>>) = groups.into_iter().unzip();
        if labels.len() < 2 {
            return Err(TripmineError::dataset(format!(
                "triplets need at least 2 classes, found {}",
                labels.len()
            )));
        }
        let anchor_slots: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.len() >= 2)
            .map(|(slot, _)| slot)
            .collect();
        if anchor_slots.is_empty() {
            return Err(TripmineError::dataset(
                "no class has two examples to form an anchor/positive pair",
            ));
        }
        Ok(Self {
            labels,
            members,
            anchor_slots,
        })
    }

    fn slot_of(&self, label: usize) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// Anchor and positive from one class, negative from a different one.
    fn sample(&self, rng: &mut ChaCha8Rng) -> Triplet {
        let slot = self.anchor_slots[rng.gen_range(0..self.anchor_slots.len())];
        let same = &self.members[slot];
        let a = rng.gen_range(0..same.len());
        let mut p = rng.gen_range(0..same.len() - 1);
        if p >= a {
            p += 1;
        }

        let mut neg_slot = rng.gen_range(0..self.labels.len() - 1);
        if neg_slot >= slot {
            neg_slot += 1;
        }
        let other = &self.members[neg_slot];
        let n = other[rng.gen_range(0..other.len())];

        Triplet::new(same[a], same[p], n)
    }
}

/// Active triplet list over a fixed example store.
#[derive(Debug, Clone)]
pub struct TripletDataset {
    examples: Arc<Examples>,
    index: ClassIndex,
    snapshot: Arc<TripletSnapshot>,
    rng: ChaCha8Rng,
}

impl TripletDataset {
    /// Build a dataset with `n_triplets` freshly sampled triplets over every class.
    pub fn new(examples: Arc<Examples>, n_triplets: usize, seed: u64) -> Result<Self> {
        Self::build(examples, n_triplets, None, seed)
    }

    /// Like [`new`](Self::new) but only the `num_classes` smallest labels take part.
    pub fn with_class_limit(
        examples: Arc<Examples>,
        n_triplets: usize,
        num_classes: usize,
        seed: u64,
    ) -> Result<Self> {
        Self::build(examples, n_triplets, Some(num_classes), seed)
    }

    fn build(
        examples: Arc<Examples>,
        n_triplets: usize,
        class_limit: Option<usize>,
        seed: u64,
    ) -> Result<Self> {
        if n_triplets == 0 {
            return Err(TripmineError::config("triplet count must be positive"));
        }
        let index = ClassIndex::build(&examples, class_limit)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let triplets = (0..n_triplets).map(|_| index.sample(&mut rng)).collect();

        tracing::debug!(
            triplets = n_triplets,
            classes = index.labels.len(),
            examples = examples.len(),
            "Built triplet dataset"
        );

        Ok(Self {
            examples,
            index,
            snapshot: Arc::new(TripletSnapshot::new(0, triplets)),
            rng,
        })
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// The current immutable triplet list.
    pub fn snapshot(&self) -> Arc<TripletSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn examples(&self) -> &Arc<Examples> {
        &self.examples
    }

    /// Class labels taking part in sampling, ascending.
    pub fn classes(&self) -> &[usize] {
        &self.index.labels
    }

    /// Feature rows and ids of the `index`-th triplet in the current snapshot.
    pub fn get(&self, index: usize) -> Result<TripletSample<'_>> {
        let triplet = *self.snapshot.get(index).ok_or_else(|| {
            TripmineError::dataset(format!(
                "triplet index {index} out of range ({})",
                self.snapshot.len()
            ))
        })?;
        self.resolve(triplet)
    }

    /// Feature rows for an arbitrary triplet over this dataset's examples.
    pub fn resolve(&self, triplet: Triplet) -> Result<TripletSample<'_>> {
        let row = |id: usize| {
            self.examples.row(id).ok_or_else(|| {
                TripmineError::dataset(format!(
                    "example {id} in {triplet} out of range ({})",
                    self.examples.len()
                ))
            })
        };
        Ok(TripletSample {
            triplet,
            anchor: row(triplet.anchor)?,
            positive: row(triplet.positive)?,
            negative: row(triplet.negative)?,
        })
    }

    /// Whether `triplet` references known examples with a valid class layout.
    pub fn is_valid(&self, triplet: &Triplet) -> bool {
        let label = |id| self.examples.label(id);
        match (
            label(triplet.anchor),
            label(triplet.positive),
            label(triplet.negative),
        ) {
            (Some(a), Some(p), Some(n)) => {
                a == p
                    && a != n
                    && triplet.anchor != triplet.positive
                    && self.index.slot_of(a).is_some()
                    && self.index.slot_of(n).is_some()
            }
            _ => false,
        }
    }

    /// Replace the triplet list with `total_count` entries, the first
    /// `min(hard_count, sampler.len())` taken from the sampler's ranking.
    ///
    /// The sampler is only read; resetting it is the caller's job.
    pub fn regenerate_triplet_list(
        &mut self,
        total_count: usize,
        sampler: &HardNegativeSampler,
        hard_count: usize,
    ) -> Result<Arc<TripletSnapshot>> {
        if total_count == 0 {
            return Err(TripmineError::config("regenerated triplet count must be positive"));
        }
        if hard_count > total_count {
            return Err(TripmineError::config(format!(
                "hard_count {hard_count} exceeds total_count {total_count}"
            )));
        }

        let hard = sampler.top_n(hard_count);
        if let Some(bad) = hard.iter().find(|t| !self.is_valid(t)) {
            return Err(TripmineError::dataset(format!(
                "sampler returned triplet {bad} that does not belong to this dataset"
            )));
        }

        let n_hard = hard.len();
        let mut triplets = hard;
        triplets.reserve(total_count - n_hard);
        for _ in n_hard..total_count {
            triplets.push(self.index.sample(&mut self.rng));
        }

        let next = Arc::new(TripletSnapshot::new(self.snapshot.version() + 1, triplets));
        tracing::info!(
            version = next.version(),
            total = total_count,
            hard = n_hard,
            requested_hard = hard_count,
            fresh = total_count - n_hard,
            "Regenerated triplet list"
        );
        self.snapshot = Arc::clone(&next);
        Ok(next)
    }
}
