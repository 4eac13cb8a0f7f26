//! Running averages and per-epoch training history.

use serde::{Deserialize, Serialize};

/// Tracks the latest value and a sample-weighted running mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AverageMeter {
    pub val: f64,
    pub avg: f64,
    pub sum: f64,
    pub count: usize,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `val` as the mean of `n` samples.
    pub fn update(&mut self, val: f64, n: usize) {
        self.val = val;
        self.sum += val * n as f64;
        self.count += n;
        if self.count > 0 {
            self.avg = self.sum / self.count as f64;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Aggregates for one split of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Everything measured during one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train: SplitMetrics,
    /// Average of the three batch embedding-matrix norms.
    pub emb_norm: f64,
    pub test: SplitMetrics,
    pub knn_accuracy: f64,
    pub is_best: bool,
    /// Version of the triplet snapshot trained on.
    pub snapshot_version: u64,
    /// Whether the triplet list was regenerated at the end of this epoch.
    pub regenerated: bool,
    /// Hard triplets held by the sampler when the pass finished.
    pub hard_pool_size: usize,
}

/// Per-epoch history with best-accuracy tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochReport>,
    pub best_epoch: Option<usize>,
    pub best_accuracy: Option<f64>,
}

impl TrainingHistory {
    pub fn record(&mut self, report: EpochReport) {
        let acc = report.test.accuracy;
        if self.best_accuracy.is_none_or(|best| acc > best) {
            self.best_accuracy = Some(acc);
            self.best_epoch = Some(report.epoch);
        }
        self.epochs.push(report);
    }

    pub fn last(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }

    pub fn train_loss_history(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train.loss).collect()
    }
}

/// Outcome of a full training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    pub best_accuracy: f64,
    pub best_epoch: Option<usize>,
    pub final_knn_accuracy: Option<f64>,
    pub regenerations: usize,
    pub stopped_early: bool,
    pub history: TrainingHistory,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(epoch: usize, acc: f64) -> EpochReport {
        EpochReport {
            epoch,
            train: SplitMetrics {
                loss: 1.0 / epoch as f64,
                accuracy: acc,
            },
            emb_norm: 1.0,
            test: SplitMetrics {
                loss: 0.5,
                accuracy: acc,
            },
            knn_accuracy: 0.0,
            is_best: false,
            snapshot_version: 0,
            regenerated: false,
            hard_pool_size: 0,
        }
    }

    #[test]
    fn test_average_meter() {
        let mut meter = AverageMeter::new();
        meter.update(1.0, 2);
        meter.update(4.0, 1);
        assert_eq!(meter.val, 4.0);
        assert_eq!(meter.count, 3);
        assert!((meter.avg - 2.0).abs() < 1e-12);
        meter.reset();
        assert_eq!(meter, AverageMeter::default());
    }

    #[test]
    fn test_history_best_is_strict_maximum() {
        let mut history = TrainingHistory::default();
        history.record(report(1, 0.6));
        history.record(report(2, 0.8));
        history.record(report(3, 0.8));
        history.record(report(4, 0.7));
        assert_eq!(history.best_epoch, Some(2));
        assert_eq!(history.best_accuracy, Some(0.8));
        assert_eq!(history.train_loss_history().len(), 4);
        assert_eq!(history.last().map(|r| r.epoch), Some(4));
    }
}
