//! Triplet margin objective with an embedding-norm penalty.

use super::TripletForward;
use crate::error::{Result, TripmineError};
use crate::metric::{margin_violation, norm_squared};
use serde::{Deserialize, Serialize};

/// Loss settings shared by training and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripletObjective {
    pub margin: f32,
    /// Weight of `‖E_a‖ + ‖E_p‖ + ‖E_n‖` in the total loss.
    pub embed_reg: f32,
}

impl Default for TripletObjective {
    fn default() -> Self {
        Self {
            margin: 0.2,
            embed_reg: 0.001,
        }
    }
}

/// Loss terms for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchLoss {
    /// `max(0, margin - (dist_an - dist_ap))` per triplet.
    pub per_example: Vec<f32>,
    /// Mean of `per_example`.
    pub triplet: f32,
    /// Frobenius norms of the anchor, positive and negative embedding matrices.
    pub embed_norms: [f32; 3],
    /// `triplet + embed_reg * sum(embed_norms)`.
    pub total: f32,
}

impl BatchLoss {
    /// Average embedding-matrix norm, the figure reported as `emb_norms`.
    pub fn mean_embed_norm(&self) -> f32 {
        self.embed_norms.iter().sum::<f32>() / 3.0
    }
}

impl TripletObjective {
    pub fn new(margin: f32, embed_reg: f32) -> Self {
        Self { margin, embed_reg }
    }

    pub fn evaluate(&self, forward: &TripletForward) -> Result<BatchLoss> {
        let n = forward.len();
        if n == 0 {
            return Err(TripmineError::shape("cannot score an empty batch"));
        }
        if forward.dist_an.len() != n {
            return Err(TripmineError::shape(format!(
                "{n} anchor-positive distances but {} anchor-negative",
                forward.dist_an.len()
            )));
        }

        let per_example: Vec<f32> = forward
            .dist_ap
            .iter()
            .zip(&forward.dist_an)
            .map(|(&ap, &an)| margin_violation(ap, an, self.margin))
            .collect();
        let triplet = per_example.iter().sum::<f32>() / n as f32;

        let frobenius = |rows: &[Vec<f32>]| rows.iter().map(|r| norm_squared(r)).sum::<f32>().sqrt();
        let embed_norms = [
            frobenius(&forward.emb_a),
            frobenius(&forward.emb_p),
            frobenius(&forward.emb_n),
        ];
        let total = triplet + self.embed_reg * embed_norms.iter().sum::<f32>();

        Ok(BatchLoss {
            per_example,
            triplet,
            embed_norms,
            total,
        })
    }
}
