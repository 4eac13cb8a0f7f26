//! Linear projection embedder trained with momentum SGD.
//!
//! `e = W x` with `W` of shape `output_dim x input_dim`, stored row-major.
//! Gradients of the triplet hinge and the embedding-norm penalty are computed
//! in closed form.

use super::{EmbeddingModel, ModelState, StepOutput, TripletModel, TripletObjective};
use crate::data::TripletSample;
use crate::error::{Result, TripmineError};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const KIND: &str = "linear";

/// Distances below this are treated as this for gradient purposes.
const DIST_EPS: f32 = 1e-8;

/// Optimiser settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub lr: f32,
    pub momentum: f32,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearEmbedder {
    input_dim: usize,
    output_dim: usize,
    weights: Vec<f32>,
    velocity: Vec<f32>,
    sgd: SgdConfig,
}

impl LinearEmbedder {
    /// Weights drawn uniformly from `±1/sqrt(input_dim)`.
    pub fn new(input_dim: usize, output_dim: usize, seed: u64) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(TripmineError::model(format!(
                "linear embedder needs positive dimensions, got {input_dim} -> {output_dim}"
            )));
        }
        let bound = 1.0 / (input_dim as f32).sqrt();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weights = (0..input_dim * output_dim)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        Ok(Self {
            input_dim,
            output_dim,
            weights,
            velocity: vec![0.0; input_dim * output_dim],
            sgd: SgdConfig::default(),
        })
    }

    /// Build from explicit row-major weights.
    pub fn from_weights(input_dim: usize, output_dim: usize, weights: Vec<f32>) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 || weights.len() != input_dim * output_dim {
            return Err(TripmineError::model(format!(
                "{} weights do not fit a {output_dim}x{input_dim} projection",
                weights.len()
            )));
        }
        Ok(Self {
            input_dim,
            output_dim,
            velocity: vec![0.0; weights.len()],
            weights,
            sgd: SgdConfig::default(),
        })
    }

    #[must_use]
    pub fn with_sgd(mut self, sgd: SgdConfig) -> Self {
        self.sgd = sgd;
        self
    }

    pub fn sgd(&self) -> SgdConfig {
        self.sgd
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    fn check_input(&self, x: &[f32]) -> Result<()> {
        if x.len() != self.input_dim {
            return Err(TripmineError::shape(format!(
                "input has dimension {} but the embedder expects {}",
                x.len(),
                self.input_dim
            )));
        }
        Ok(())
    }

    /// `grad += coef * x` on row `r`.
    fn accumulate(&self, grad: &mut [f32], r: usize, coef: f32, x: impl Iterator<Item = f32>) {
        let row = &mut grad[r * self.input_dim..(r + 1) * self.input_dim];
        for (g, xi) in row.iter_mut().zip(x) {
            *g += coef * xi;
        }
    }
}

impl EmbeddingModel for LinearEmbedder {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }

    fn embed(&self, x: &[f32]) -> Result<Vec<f32>> {
        self.check_input(x)?;
        Ok(self
            .weights
            .chunks_exact(self.input_dim)
            .map(|row| row.iter().zip(x).map(|(w, v)| w * v).sum())
            .collect())
    }

    fn num_parameters(&self) -> usize {
        self.weights.len()
    }

    fn state(&self) -> ModelState {
        ModelState {
            kind: KIND.to_string(),
            input_dim: self.input_dim,
            output_dim: self.output_dim,
            weights: self.weights.clone(),
        }
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        if state.kind != KIND {
            return Err(TripmineError::model(format!(
                "cannot load '{}' weights into a linear embedder",
                state.kind
            )));
        }
        if state.input_dim != self.input_dim
            || state.output_dim != self.output_dim
            || state.weights.len() != self.weights.len()
        {
            return Err(TripmineError::model(format!(
                "checkpoint is {}x{} with {} weights, model is {}x{}",
                state.output_dim,
                state.input_dim,
                state.weights.len(),
                self.output_dim,
                self.input_dim
            )));
        }
        self.weights.copy_from_slice(&state.weights);
        self.velocity.iter_mut().for_each(|v| *v = 0.0);
        Ok(())
    }
}

impl TripletModel for LinearEmbedder {
    fn train_step(
        &mut self,
        batch: &[TripletSample<'_>],
        objective: &TripletObjective,
    ) -> Result<StepOutput> {
        let forward = self.forward(batch)?;
        let loss = objective.evaluate(&forward)?;
        if !loss.total.is_finite() {
            return Err(TripmineError::training(format!(
                "non-finite loss {} in a batch of {}",
                loss.total,
                batch.len()
            )));
        }

        let scale = 1.0 / batch.len() as f32;
        let mut grad = vec![0.0f32; self.weights.len()];

        // Hinge: d(d_ap - d_an)/dW for every triplet still inside the margin.
        for (i, s) in batch.iter().enumerate() {
            if loss.per_example[i] <= 0.0 {
                continue;
            }
            let d_ap = forward.dist_ap[i].max(DIST_EPS);
            let d_an = forward.dist_an[i].max(DIST_EPS);
            for r in 0..self.output_dim {
                let cu = (forward.emb_a[i][r] - forward.emb_p[i][r]) / d_ap * scale;
                let cv = (forward.emb_a[i][r] - forward.emb_n[i][r]) / d_an * scale;
                let diff_p = s.anchor.iter().zip(s.positive).map(|(a, p)| a - p);
                self.accumulate(&mut grad, r, cu, diff_p);
                let diff_n = s.anchor.iter().zip(s.negative).map(|(a, n)| a - n);
                self.accumulate(&mut grad, r, -cv, diff_n);
            }
        }

        // Norm penalty: d‖E‖_F/dW = sum_i (e_i / ‖E‖_F) x_i^T.
        if objective.embed_reg > 0.0 {
            for k in 0..3 {
                let norm = loss.embed_norms[k];
                if norm <= DIST_EPS {
                    continue;
                }
                let embeddings = match k {
                    0 => &forward.emb_a,
                    1 => &forward.emb_p,
                    _ => &forward.emb_n,
                };
                for (e, s) in embeddings.iter().zip(batch) {
                    let x = match k {
                        0 => s.anchor,
                        1 => s.positive,
                        _ => s.negative,
                    };
                    for (r, &er) in e.iter().enumerate() {
                        let coef = objective.embed_reg * er / norm;
                        self.accumulate(&mut grad, r, coef, x.iter().copied());
                    }
                }
            }
        }

        let SgdConfig { lr, momentum } = self.sgd;
        for ((w, v), g) in self.weights.iter_mut().zip(&mut self.velocity).zip(&grad) {
            *v = momentum * *v + g;
            *w -= lr * *v;
        }

        Ok(StepOutput { forward, loss })
    }
}
