//! Epoch loop: train, evaluate, checkpoint, and periodically regenerate
//! the triplet list from the hard-negative pool.
//!
//! All run state (best accuracy, sampler, sink, store) lives on [`Trainer`].
//! The sampler is only written inside [`Trainer::train_epoch`] and is read
//! and cleared afterwards, between passes.

use super::callbacks::{CallbackAction, EarlyStopping, EpochCallback};
use super::checkpoint::{CheckpointStore, MemoryCheckpointStore, TrainingState};
use super::metrics::{AverageMeter, EpochReport, SplitMetrics, TrainingHistory, TrainingSummary};
use super::seed::SeedManager;
use super::sink::{MetricsSink, TracingSink};
use crate::config::TrainingConfig;
use crate::data::{Examples, Triplet, TripletDataset, TripletLoader, TripletSample};
use crate::error::{Result, TripmineError};
use crate::knn::knn_accuracy;
use crate::metric::triplet_accuracy;
use crate::mining::{HardNegativeSampler, HardnessPolicy};
use crate::model::{TripletModel, TripletObjective};

/// Margin used when counting a triplet as correctly ordered.
const ACCURACY_MARGIN: f32 = 0.0;

/// Examples used for kNN evaluation, independent of any triplet list.
#[derive(Debug, Clone)]
pub struct KnnSplit {
    pub reference: Examples,
    pub query: Examples,
}

/// Aggregates of one training pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassMetrics {
    pub split: SplitMetrics,
    pub emb_norm: f64,
    pub snapshot_version: u64,
    pub batches: usize,
}

pub struct Trainer<'a> {
    config: TrainingConfig,
    objective: TripletObjective,
    sampler: HardNegativeSampler,
    loader: TripletLoader,
    best_acc: f64,
    start_epoch: usize,
    regenerations: usize,
    history: TrainingHistory,
    sink: Box<dyn MetricsSink + 'a>,
    store: Box<dyn CheckpointStore + 'a>,
    callbacks: Vec<Box<dyn EpochCallback + 'a>>,
}

impl std::fmt::Debug for Trainer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("name", &self.config.name)
            .field("best_acc", &self.best_acc)
            .field("start_epoch", &self.start_epoch)
            .field("sampler", &self.sampler)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl<'a> Trainer<'a> {
    /// Validates `config` and sets up the sampler and loader. Metrics go to
    /// `tracing` and checkpoints stay in memory until replaced with
    /// [`with_sink`](Self::with_sink) / [`with_store`](Self::with_store).
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let mut seeds = SeedManager::new(config.seed);
        let sampler = HardNegativeSampler::new(config.num_classes, config.pool_size_per_unit())?
            .with_policy(HardnessPolicy::MarginViolation {
                margin: config.margin,
            });
        let loader = TripletLoader::new(config.batch_size, seeds.get_seed("loader"))?;

        let mut callbacks: Vec<Box<dyn EpochCallback + 'a>> = Vec::new();
        if let Some(patience) = config.early_stopping_patience {
            callbacks.push(Box::new(EarlyStopping::new(patience, 0.0)));
        }

        Ok(Self {
            objective: TripletObjective::new(config.margin, config.embed_reg),
            sampler,
            loader,
            best_acc: 0.0,
            start_epoch: 1,
            regenerations: 0,
            history: TrainingHistory::default(),
            sink: Box::new(TracingSink),
            store: Box::new(MemoryCheckpointStore::new()),
            callbacks,
            config,
        })
    }

    #[must_use]
    pub fn with_sink(mut self, sink: impl MetricsSink + 'a) -> Self {
        self.sink = Box::new(sink);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: impl CheckpointStore + 'a) -> Self {
        self.store = Box::new(store);
        self
    }

    #[must_use]
    pub fn with_callback(mut self, callback: impl EpochCallback + 'a) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn objective(&self) -> TripletObjective {
        self.objective
    }

    pub fn sampler(&self) -> &HardNegativeSampler {
        &self.sampler
    }

    /// Best validation triplet accuracy so far.
    pub fn best_accuracy(&self) -> f64 {
        self.best_acc
    }

    /// First epoch [`run`](Self::run) will execute.
    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    /// Continue from a saved state: weights, next epoch and best accuracy.
    pub fn resume<M: TripletModel>(&mut self, model: &mut M, state: &TrainingState) -> Result<()> {
        if state.epoch == 0 {
            return Err(TripmineError::checkpoint("checkpoint epoch must be at least 1"));
        }
        model.load_state(&state.model)?;
        self.start_epoch = state.epoch;
        self.best_acc = state.best_metric;
        tracing::info!(
            epoch = state.epoch,
            best = state.best_metric,
            "Resumed from checkpoint"
        );
        Ok(())
    }

    /// One pass over the dataset's current snapshot, updating the model and
    /// feeding every triplet to the sampler.
    ///
    /// The reported loss is the triplet hinge alone, matching
    /// [`evaluate`](Self::evaluate). The norm penalty only drives the update
    /// and shows up as `emb_norm`.
    pub fn train_epoch<M: TripletModel>(
        &mut self,
        epoch: usize,
        model: &mut M,
        dataset: &TripletDataset,
    ) -> Result<PassMetrics> {
        let snapshot = dataset.snapshot();
        let total = snapshot.len();
        let num_batches = self.loader.num_batches(&snapshot);
        let batches = self.loader.epoch(snapshot);
        let snapshot_version = batches.snapshot_version();

        let mut losses = AverageMeter::new();
        let mut accs = AverageMeter::new();
        let mut emb_norms = AverageMeter::new();
        let mut processed = 0usize;
        let mut batch_count = 0usize;

        for (batch_idx, batch) in batches.enumerate() {
            let samples = resolve_batch(dataset, &batch)?;
            let step = model.train_step(&samples, &self.objective)?;
            let n = batch.len();

            self.sampler.sample_negatives(
                &step.forward.dist_ap,
                &step.forward.dist_an,
                &step.loss.per_example,
                &batch,
            )?;

            let acc = triplet_accuracy(&step.forward.dist_ap, &step.forward.dist_an, ACCURACY_MARGIN)?;
            losses.update(f64::from(step.loss.triplet), n);
            accs.update(acc, n);
            emb_norms.update(f64::from(step.loss.mean_embed_norm()), n);
            processed += n;
            batch_count += 1;

            if batch_idx % self.config.log_interval == 0 {
                tracing::info!(
                    epoch,
                    processed,
                    total,
                    progress = %format!("{:.0}%", 100.0 * (batch_idx + 1) as f64 / num_batches as f64),
                    loss = %format!("{:.4} ({:.4})", losses.val, losses.avg),
                    acc = %format!("{:.2}% ({:.2}%)", 100.0 * accs.val, 100.0 * accs.avg),
                    emb_norm = %format!("{:.2} ({:.2})", emb_norms.val, emb_norms.avg),
                    "Train batch"
                );
            }
        }

        Ok(PassMetrics {
            split: SplitMetrics {
                loss: losses.avg,
                accuracy: accs.avg,
            },
            emb_norm: emb_norms.avg,
            snapshot_version,
            batches: batch_count,
        })
    }

    /// Triplet loss and accuracy on a held-out dataset. The model is not updated.
    pub fn evaluate<M: TripletModel>(&self, model: &M, dataset: &TripletDataset) -> Result<SplitMetrics> {
        let snapshot = dataset.snapshot();
        let mut losses = AverageMeter::new();
        let mut accs = AverageMeter::new();

        for chunk in snapshot.triplets().chunks(self.config.test_batch_size) {
            let samples = resolve_batch(dataset, chunk)?;
            let forward = model.forward(&samples)?;
            let loss = self.objective.evaluate(&forward)?;
            let acc = triplet_accuracy(&forward.dist_ap, &forward.dist_an, ACCURACY_MARGIN)?;
            losses.update(f64::from(loss.triplet), chunk.len());
            accs.update(acc, chunk.len());
        }

        tracing::info!(
            triplets = snapshot.len(),
            loss = %format!("{:.4}", losses.avg),
            acc = %format!("{:.2}%", 100.0 * accs.avg),
            "Test set"
        );
        Ok(SplitMetrics {
            loss: losses.avg,
            accuracy: accs.avg,
        })
    }

    /// kNN accuracy of query embeddings against reference embeddings.
    pub fn knn_evaluate<M: TripletModel>(&self, model: &M, split: &KnnSplit) -> Result<f64> {
        let reference = model.embed_all(&split.reference)?;
        let query = model.embed_all(&split.query)?;
        let acc = knn_accuracy(
            &query,
            &reference,
            split.query.labels(),
            split.reference.labels(),
            self.config.knn_k,
        )?;
        tracing::info!(
            k = self.config.knn_k,
            acc = %format!("{:.2}%", 100.0 * acc),
            "kNN accuracy"
        );
        Ok(acc)
    }

    /// Run epochs `start_epoch..=epochs`.
    ///
    /// Each epoch trains, evaluates, checkpoints, and when `epoch` is a
    /// multiple of `triplet_freq` rebuilds the training triplets from the
    /// sampler before resetting it. Errors abort the run.
    pub fn run<M: TripletModel>(
        &mut self,
        model: &mut M,
        train: &mut TripletDataset,
        test: &TripletDataset,
        knn: &KnnSplit,
    ) -> Result<TrainingSummary> {
        let mut stopped_early = false;
        let first = self.start_epoch;

        for epoch in first..=self.config.epochs {
            let pass = self.train_epoch(epoch, model, train)?;
            self.sink.record("acc", "train", epoch, pass.split.accuracy);
            self.sink.record("loss", "train", epoch, pass.split.loss);
            self.sink.record("emb_norms", "train", epoch, pass.emb_norm);

            let eval = self.evaluate(model, test)?;
            self.sink.record("acc", "test", epoch, eval.accuracy);
            self.sink.record("loss", "test", epoch, eval.loss);

            let knn_acc = self.knn_evaluate(model, knn)?;
            self.sink.record("knn_acc", "test", epoch, knn_acc);

            let is_best = eval.accuracy > self.best_acc;
            self.best_acc = self.best_acc.max(eval.accuracy);
            let state = TrainingState {
                epoch: epoch + 1,
                model: model.state(),
                best_metric: self.best_acc,
            };
            self.store.save(&state, is_best)?;

            let hard_pool_size = self.sampler.len();
            let regenerated = epoch % self.config.triplet_freq == 0;
            if regenerated {
                train.regenerate_triplet_list(
                    self.config.num_triplets(),
                    &self.sampler,
                    self.config.hard_count(),
                )?;
                self.sampler.reset();
                self.regenerations += 1;
            }

            let report = EpochReport {
                epoch,
                train: pass.split,
                emb_norm: pass.emb_norm,
                test: eval,
                knn_accuracy: knn_acc,
                is_best,
                snapshot_version: pass.snapshot_version,
                regenerated,
                hard_pool_size,
            };
            tracing::info!(
                epoch,
                train_loss = report.train.loss,
                test_acc = report.test.accuracy,
                knn_acc,
                best = self.best_acc,
                is_best,
                regenerated,
                "Epoch complete"
            );

            let mut stop_by = None;
            for callback in &mut self.callbacks {
                if callback.on_epoch_end(&report) == CallbackAction::Stop && stop_by.is_none() {
                    stop_by = Some(callback.name().to_string());
                }
            }
            self.history.record(report);

            if let Some(name) = stop_by {
                tracing::warn!(epoch, callback = %name, "Stopping training early");
                stopped_early = true;
                break;
            }
        }

        let best_epoch = self
            .history
            .epochs
            .iter()
            .rev()
            .find(|r| r.is_best)
            .map(|r| r.epoch);
        Ok(TrainingSummary {
            epochs_run: self.history.epochs.len(),
            best_accuracy: self.best_acc,
            best_epoch,
            final_knn_accuracy: self.history.last().map(|r| r.knn_accuracy),
            regenerations: self.regenerations,
            stopped_early,
            history: self.history.clone(),
        })
    }
}

fn resolve_batch<'d>(dataset: &'d TripletDataset, batch: &[Triplet]) -> Result<Vec<TripletSample<'d>>> {
    batch.iter().map(|&t| dataset.resolve(t)).collect()
}
