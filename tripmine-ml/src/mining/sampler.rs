//! Online hard-negative sampler.
//!
//! During a training pass the trainer reports every triplet's distances and
//! loss through [`HardNegativeSampler::sample_negatives`]. The sampler scores
//! each one with its [`HardnessPolicy`] and keeps the hardest in a bounded
//! [`HardPool`]. Between passes the dataset harvests [`top_n`] to seed the next
//! triplet list, after which the trainer calls [`reset`].
//!
//! [`top_n`]: HardNegativeSampler::top_n
//! [`reset`]: HardNegativeSampler::reset

use super::pool::{HardPool, HardRecord};
use crate::data::Triplet;
use crate::error::{Result, TripmineError};
use crate::metric::margin_violation;
use serde::{Deserialize, Serialize};

/// Margin used by the default hardness policy.
pub const DEFAULT_MARGIN: f32 = 0.2;

/// One triplet's outcome from a single training batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripletObservation {
    pub triplet: Triplet,
    pub dist_ap: f32,
    pub dist_an: f32,
    pub loss: f32,
}

/// How a single observation is turned into a hardness score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HardnessPolicy {
    /// `max(0, margin - (dist_an - dist_ap))`.
    MarginViolation { margin: f32 },
    /// The per-example loss reported by the caller.
    ObservedLoss,
}

impl Default for HardnessPolicy {
    fn default() -> Self {
        Self::MarginViolation {
            margin: DEFAULT_MARGIN,
        }
    }
}

impl HardnessPolicy {
    pub fn score(&self, obs: &TripletObservation) -> f32 {
        match self {
            Self::MarginViolation { margin } => margin_violation(obs.dist_ap, obs.dist_an, *margin),
            Self::ObservedLoss => obs.loss,
        }
    }
}

/// Keeps the `num_classes * pool_size_per_unit` hardest triplets of a pass.
///
/// Under [`HardnessPolicy::MarginViolation`] a triplet scoring zero already
/// satisfies the margin and is not a hard negative, so it never enters the
/// pool. [`HardnessPolicy::ObservedLoss`] admits every finite score.
#[derive(Debug, Clone)]
pub struct HardNegativeSampler {
    num_classes: usize,
    pool_size_per_unit: usize,
    policy: HardnessPolicy,
    pool: HardPool,
    skipped: u64,
    satisfied: u64,
}

impl HardNegativeSampler {
    /// Create a sampler with one block of `pool_size_per_unit` slots per class.
    ///
    /// Callers usually derive `pool_size_per_unit` as
    /// `total_triplet_budget / batch_size`.
    pub fn new(num_classes: usize, pool_size_per_unit: usize) -> Result<Self> {
        if num_classes == 0 {
            return Err(TripmineError::config("sampler needs at least one class"));
        }
        if pool_size_per_unit == 0 {
            return Err(TripmineError::config(
                "sampler pool size per class must be positive",
            ));
        }
        let capacity = num_classes.checked_mul(pool_size_per_unit).ok_or_else(|| {
            TripmineError::config(format!(
                "sampler capacity overflows: {num_classes} x {pool_size_per_unit}"
            ))
        })?;
        Ok(Self {
            num_classes,
            pool_size_per_unit,
            policy: HardnessPolicy::default(),
            pool: HardPool::new(capacity)?,
            skipped: 0,
            satisfied: 0,
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: HardnessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> HardnessPolicy {
        self.policy
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn pool_size_per_unit(&self) -> usize {
        self.pool_size_per_unit
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Observations reported since the last reset, admitted or not.
    pub fn observed(&self) -> u64 {
        self.pool.offered() + self.skipped + self.satisfied
    }

    /// Observations dropped for a non-finite hardness since the last reset.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Observations left out of the pool because they already met the margin.
    pub fn satisfied(&self) -> u64 {
        self.satisfied
    }

    /// Score and offer one observation. Returns whether it entered the pool.
    pub fn observe(&mut self, obs: TripletObservation) -> bool {
        let hardness = self.policy.score(&obs);
        if !hardness.is_finite() {
            self.skipped += 1;
            tracing::warn!(
                triplet = %obs.triplet,
                dist_ap = obs.dist_ap,
                dist_an = obs.dist_an,
                loss = obs.loss,
                "Skipping triplet with non-finite hardness"
            );
            return false;
        }
        if hardness <= 0.0 && matches!(self.policy, HardnessPolicy::MarginViolation { .. }) {
            self.satisfied += 1;
            return false;
        }
        self.pool.offer(obs.triplet, hardness)
    }

    /// Feed one batch of observations.
    ///
    /// All four slices describe the same batch and must have equal length;
    /// anything else is rejected before the pool is touched.
    pub fn sample_negatives(
        &mut self,
        dist_ap: &[f32],
        dist_an: &[f32],
        losses: &[f32],
        triplets: &[Triplet],
    ) -> Result<()> {
        let n = triplets.len();
        if dist_ap.len() != n || dist_an.len() != n || losses.len() != n {
            return Err(TripmineError::shape(format!(
                "batch of {n} triplets reported {} dist_ap, {} dist_an and {} losses",
                dist_ap.len(),
                dist_an.len(),
                losses.len()
            )));
        }

        let mut admitted = 0usize;
        for i in 0..n {
            let obs = TripletObservation {
                triplet: triplets[i],
                dist_ap: dist_ap[i],
                dist_an: dist_an[i],
                loss: losses[i],
            };
            if self.observe(obs) {
                admitted += 1;
            }
        }
        tracing::trace!(batch = n, admitted, pool = self.pool.len(), "Sampled batch");
        Ok(())
    }

    /// Up to `n` of the hardest triplets, hardest first.
    pub fn top_n(&self, n: usize) -> Vec<Triplet> {
        self.pool.top_n(n)
    }

    /// Pool contents with their scores, hardest first.
    pub fn ranked(&self) -> Vec<HardRecord> {
        self.pool.ranked()
    }

    /// Hardness of the strongest record, if any.
    pub fn hardest(&self) -> Option<f32> {
        self.ranked().first().map(|r| r.hardness)
    }

    /// Empty the pool. Safe to call on an empty sampler.
    pub fn reset(&mut self) {
        tracing::debug!(
            held = self.pool.len(),
            observed = self.pool.offered(),
            skipped = self.skipped,
            satisfied = self.satisfied,
            "Resetting hard-negative sampler"
        );
        self.pool.clear();
        self.skipped = 0;
        self.satisfied = 0;
    }
}
