//! Synthetic class-clustered data for runs without a real corpus.
//!
//! Each class gets a Gaussian centroid; examples are the centroid plus
//! isotropic Gaussian noise. Centroids are fixed at construction so train,
//! validation and kNN splits drawn from the same generator share the geometry.

use super::examples::Examples;
use crate::config::SyntheticDataConfig;
use crate::error::{Result, TripmineError};
use rand::SeedableRng;
use rand::prelude::Distribution;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;

#[derive(Debug, Clone)]
pub struct SyntheticClusters {
    input_dim: usize,
    centroids: Vec<Vec<f32>>,
    noise: Normal<f32>,
    rng: ChaCha8Rng,
}

impl SyntheticClusters {
    pub fn new(config: &SyntheticDataConfig, num_classes: usize, seed: u64) -> Result<Self> {
        if config.input_dim == 0 || num_classes == 0 {
            return Err(TripmineError::config(
                "synthetic data needs a positive input_dim and class count",
            ));
        }
        let spread = Normal::new(0.0f32, config.class_spread).map_err(|e| {
            TripmineError::config(format!("invalid class_spread {}: {e}", config.class_spread))
        })?;
        let noise = Normal::new(0.0f32, config.noise_std).map_err(|e| {
            TripmineError::config(format!("invalid noise_std {}: {e}", config.noise_std))
        })?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let centroids = (0..num_classes)
            .map(|_| {
                (0..config.input_dim)
                    .map(|_| spread.sample(&mut rng))
                    .collect()
            })
            .collect();

        Ok(Self {
            input_dim: config.input_dim,
            centroids,
            noise,
            rng,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.centroids.len()
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// `total` examples, labels assigned round-robin so classes stay balanced.
    pub fn sample(&mut self, total: usize) -> Result<Examples> {
        let k = self.centroids.len();
        let mut features = Vec::with_capacity(total * self.input_dim);
        let mut labels = Vec::with_capacity(total);
        for i in 0..total {
            let label = i % k;
            for &c in &self.centroids[label] {
                features.push(c + self.noise.sample(&mut self.rng));
            }
            labels.push(label);
        }
        Examples::new(self.input_dim, features, labels)
    }
}
