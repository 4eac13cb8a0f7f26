//! Embedding models and the triplet forward pass.
//!
//! The training loop only talks to models through [`EmbeddingModel`] and
//! [`TripletModel`]. [`LinearEmbedder`] is the bundled implementation.

pub mod linear;
pub mod objective;

pub use linear::{LinearEmbedder, SgdConfig};
pub use objective::{BatchLoss, TripletObjective};

use crate::data::{Examples, TripletSample};
use crate::error::{Result, TripmineError};
use crate::metric::l2_distance;
use serde::{Deserialize, Serialize};

/// Serializable model weights, as stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub kind: String,
    pub input_dim: usize,
    pub output_dim: usize,
    pub weights: Vec<f32>,
}

/// Distances and embeddings for a batch of triplets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripletForward {
    pub dist_ap: Vec<f32>,
    pub dist_an: Vec<f32>,
    pub emb_a: Vec<Vec<f32>>,
    pub emb_p: Vec<Vec<f32>>,
    pub emb_n: Vec<Vec<f32>>,
}

impl TripletForward {
    pub fn len(&self) -> usize {
        self.dist_ap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dist_ap.is_empty()
    }
}

/// Result of one optimisation step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub forward: TripletForward,
    pub loss: BatchLoss,
}

/// Maps one example to a fixed-dimension embedding.
pub trait EmbeddingModel {
    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    fn embed(&self, x: &[f32]) -> Result<Vec<f32>>;

    fn num_parameters(&self) -> usize;

    fn state(&self) -> ModelState;

    fn load_state(&mut self, state: &ModelState) -> Result<()>;

    /// Embed every row of `examples`, in order.
    fn embed_all(&self, examples: &Examples) -> Result<Vec<Vec<f32>>> {
        if examples.dim() != self.input_dim() {
            return Err(TripmineError::shape(format!(
                "examples have dimension {} but the model expects {}",
                examples.dim(),
                self.input_dim()
            )));
        }
        examples.rows().map(|row| self.embed(row)).collect()
    }
}

/// Embedding model that can score and learn from triplets.
pub trait TripletModel: EmbeddingModel {
    /// Embed all three members of each triplet and measure both distances.
    fn forward(&self, batch: &[TripletSample<'_>]) -> Result<TripletForward> {
        let mut out = TripletForward {
            dist_ap: Vec::with_capacity(batch.len()),
            dist_an: Vec::with_capacity(batch.len()),
            emb_a: Vec::with_capacity(batch.len()),
            emb_p: Vec::with_capacity(batch.len()),
            emb_n: Vec::with_capacity(batch.len()),
        };
        for sample in batch {
            let a = self.embed(sample.anchor)?;
            let p = self.embed(sample.positive)?;
            let n = self.embed(sample.negative)?;
            out.dist_ap.push(l2_distance(&a, &p));
            out.dist_an.push(l2_distance(&a, &n));
            out.emb_a.push(a);
            out.emb_p.push(p);
            out.emb_n.push(n);
        }
        Ok(out)
    }

    /// Forward, score with `objective`, and apply one parameter update.
    fn train_step(
        &mut self,
        batch: &[TripletSample<'_>],
        objective: &TripletObjective,
    ) -> Result<StepOutput>;
}
