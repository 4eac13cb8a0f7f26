//! Builds the model and data splits for a run over synthetic clusters.

use super::seed::SeedManager;
use super::trainer::KnnSplit;
use crate::config::TrainingConfig;
use crate::data::{SyntheticClusters, TripletDataset};
use crate::error::{Result, TripmineError};
use crate::model::{LinearEmbedder, SgdConfig};
use std::sync::Arc;

/// Everything [`Trainer::run`](super::Trainer::run) consumes besides the config.
#[derive(Debug, Clone)]
pub struct SyntheticRun {
    pub model: LinearEmbedder,
    pub train: TripletDataset,
    pub test: TripletDataset,
    pub knn: KnnSplit,
    pub seeds: SeedManager,
}

impl SyntheticRun {
    /// Train and validation examples come from one generator so they share
    /// class centroids. The kNN split reuses the first `knn_train_size`
    /// training examples as references and the first `knn_test_size`
    /// validation examples as queries.
    ///
    /// Fails before any training if `knn_k` exceeds the references that
    /// actually exist after clamping.
    pub fn build(config: &TrainingConfig) -> Result<Self> {
        config.validate()?;
        let mut seeds = SeedManager::new(config.seed);

        let mut clusters =
            SyntheticClusters::new(&config.data, config.num_classes, seeds.get_seed("data"))?;
        let per_split = config.num_classes * config.data.examples_per_class;
        let train_examples = Arc::new(clusters.sample(per_split)?);
        let test_examples = Arc::new(clusters.sample(per_split)?);

        let train = TripletDataset::with_class_limit(
            Arc::clone(&train_examples),
            config.num_triplets(),
            config.num_classes,
            seeds.get_seed("train_triplets"),
        )?;
        let test = TripletDataset::with_class_limit(
            Arc::clone(&test_examples),
            config.num_test_triplets(),
            config.num_classes,
            seeds.get_seed("test_triplets"),
        )?;

        let reference_count = config.knn_train_size.min(train_examples.len());
        if config.knn_k > reference_count {
            return Err(TripmineError::config(format!(
                "knn_k {} exceeds the {reference_count} kNN reference examples \
                 ({} classes x {} examples per class)",
                config.knn_k, config.num_classes, config.data.examples_per_class
            )));
        }
        let reference_ids: Vec<usize> = (0..reference_count).collect();
        let query_ids: Vec<usize> = (0..config.knn_test_size.min(test_examples.len())).collect();
        let knn = KnnSplit {
            reference: train_examples.subset(&reference_ids)?,
            query: test_examples.subset(&query_ids)?,
        };

        let model = LinearEmbedder::new(
            config.data.input_dim,
            config.embedding_dim,
            seeds.get_seed("model"),
        )?
        .with_sgd(SgdConfig {
            lr: config.lr,
            momentum: config.momentum,
        });

        tracing::info!(
            train_examples = train_examples.len(),
            test_examples = test_examples.len(),
            train_triplets = train.len(),
            test_triplets = test.len(),
            knn_reference = knn.reference.len(),
            knn_query = knn.query.len(),
            "Built synthetic run"
        );

        Ok(Self {
            model,
            train,
            test,
            knn,
            seeds,
        })
    }
}
