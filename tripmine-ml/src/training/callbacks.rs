//! Epoch-end callbacks: early stopping and loss anomaly detection.

use crate::config::TrainingConfig;
use crate::training::metrics::EpochReport;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What a callback asks the training loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

pub trait EpochCallback {
    fn name(&self) -> &str;

    /// Called once per epoch after the checkpoint has been written.
    fn on_epoch_end(&mut self, report: &EpochReport) -> CallbackAction;
}

/// Stops when validation accuracy has not improved by more than
/// `min_delta` for `patience` consecutive epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best: None,
        }
    }

    pub fn observe(&mut self, accuracy: f64) -> CallbackAction {
        match self.best {
            Some(best) if accuracy <= best + self.min_delta => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                self.best = Some(accuracy);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl EpochCallback for EarlyStopping {
    fn name(&self) -> &str {
        "early_stopping"
    }

    fn on_epoch_end(&mut self, report: &EpochReport) -> CallbackAction {
        self.observe(report.test.accuracy)
    }
}

/// Stops on a non-finite loss, or when the training loss exceeds
/// `threshold` times the mean of the preceding `window_size` epochs.
#[derive(Debug, Clone)]
pub struct LossAnomalyGuard {
    pub threshold: f64,
    window: VecDeque<f64>,
    window_size: usize,
}

impl LossAnomalyGuard {
    pub fn new(threshold: f64, window_size: usize) -> Self {
        Self {
            threshold,
            window: VecDeque::with_capacity(window_size + 1),
            window_size: window_size.max(1),
        }
    }

    /// Guard configured from `loss_spike_threshold` and `loss_spike_window`.
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.loss_spike_threshold, config.loss_spike_window)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn observe(&mut self, train_loss: f64, test_loss: f64) -> CallbackAction {
        if !train_loss.is_finite() || !test_loss.is_finite() {
            return CallbackAction::Stop;
        }

        if self.window.len() >= 3 {
            let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
            if mean > 0.0 && train_loss > mean * self.threshold {
                return CallbackAction::Stop;
            }
        }

        self.window.push_back(train_loss);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }
        CallbackAction::Continue
    }
}

impl EpochCallback for LossAnomalyGuard {
    fn name(&self) -> &str {
        "loss_anomaly"
    }

    fn on_epoch_end(&mut self, report: &EpochReport) -> CallbackAction {
        self.observe(report.train.loss, report.test.loss)
    }
}
