//! # tripmine-ml: triplet-loss metric learning with online hard-negative mining
//!
//! The crate trains an embedding so that an anchor lands closer to a
//! same-class positive than to a different-class negative by a margin.
//!
//! 1. **Mining**: during each pass the [`HardNegativeSampler`] scores every
//!    triplet by margin violation and keeps the hardest in a bounded pool.
//! 2. **Regeneration**: every few epochs the [`TripletDataset`] publishes a new
//!    snapshot seeded with the pool's top triplets and back-filled with fresh
//!    class-valid ones.
//! 3. **Training**: the [`Trainer`] drives epochs, evaluation, checkpoints and
//!    the regeneration schedule.
//! 4. **Evaluation**: [`knn_accuracy`] classifies held-out embeddings against
//!    reference embeddings.

// Foundation
pub mod config;
pub mod error;
pub mod metric;
pub mod persistence;

// Data and mining
pub mod data;
pub mod mining;

// Models and training
pub mod model;
pub mod training;

// Evaluation
pub mod knn;

// Re-exports
pub use config::{SyntheticDataConfig, TrainingConfig, load_config};
pub use data::{Examples, Triplet, TripletDataset, TripletSnapshot};
pub use error::{Result, TripmineError};
pub use knn::{KnnClassifier, knn_accuracy, pairwise_distances};
pub use mining::{HardNegativeSampler, HardnessPolicy};
pub use model::{EmbeddingModel, LinearEmbedder, TripletModel, TripletObjective};
pub use training::{KnnSplit, Trainer, TrainingState, TrainingSummary};
