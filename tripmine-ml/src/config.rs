//! Configuration for training runs.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> explicit overrides. The defaults reproduce the reference
//! training setup (5 classes, 64 triplets per class, regeneration every third
//! epoch with 10% hard triplets).

use crate::error::{Result, TripmineError};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE: &str = "tripmine.toml";

/// Prefix for environment overrides, e.g. `TRIPMINE_EPOCHS=4`,
/// `TRIPMINE_DATA__NOISE_STD=0.5`.
pub const ENV_PREFIX: &str = "TRIPMINE_";

/// Everything a training run consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Experiment name; checkpoints land in `<runs_dir>/<name>/`.
    #[serde(default = "default_name")]
    pub name: String,
    /// Training mini-batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Validation mini-batch size.
    #[serde(default = "default_test_batch_size")]
    pub test_batch_size: usize,
    /// Reference examples embedded for kNN evaluation.
    #[serde(default = "default_knn_train_size")]
    pub knn_train_size: usize,
    /// Query examples classified during kNN evaluation.
    #[serde(default = "default_knn_test_size")]
    pub knn_test_size: usize,
    /// Neighbour count for kNN evaluation.
    #[serde(default = "default_knn_k")]
    pub knn_k: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_lr")]
    pub lr: f32,
    #[serde(default = "default_momentum")]
    pub momentum: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Batches between progress log lines.
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    /// Triplet loss margin.
    #[serde(default = "default_margin")]
    pub margin: f32,
    /// Epochs between triplet regenerations.
    #[serde(default = "default_triplet_freq")]
    pub triplet_freq: usize,
    /// Fraction of regenerated triplets drawn from the hard pool.
    #[serde(default = "default_hard_frac")]
    pub hard_frac: f64,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_triplets_per_class")]
    pub triplets_per_class: usize,
    #[serde(default = "default_test_triplets_per_class")]
    pub test_triplets_per_class: usize,
    /// Output dimension of the embedding model.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Weight of the embedding-norm penalty added to the triplet loss.
    #[serde(default = "default_embed_reg")]
    pub embed_reg: f32,
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
    /// Checkpoint to resume from.
    #[serde(default)]
    pub resume: Option<PathBuf>,
    /// Stop after this many epochs without a validation accuracy gain.
    #[serde(default)]
    pub early_stopping_patience: Option<usize>,
    /// Stop when the training loss exceeds this multiple of its recent mean.
    #[serde(default = "default_loss_spike_threshold")]
    pub loss_spike_threshold: f64,
    /// Epochs averaged for the loss spike check.
    #[serde(default = "default_loss_spike_window")]
    pub loss_spike_window: usize,
    /// Manifest entries kept per run.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    /// Synthetic data generator settings.
    #[serde(default)]
    pub data: SyntheticDataConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            batch_size: default_batch_size(),
            test_batch_size: default_test_batch_size(),
            knn_train_size: default_knn_train_size(),
            knn_test_size: default_knn_test_size(),
            knn_k: default_knn_k(),
            epochs: default_epochs(),
            lr: default_lr(),
            momentum: default_momentum(),
            seed: default_seed(),
            log_interval: default_log_interval(),
            margin: default_margin(),
            triplet_freq: default_triplet_freq(),
            hard_frac: default_hard_frac(),
            num_classes: default_num_classes(),
            triplets_per_class: default_triplets_per_class(),
            test_triplets_per_class: default_test_triplets_per_class(),
            embedding_dim: default_embedding_dim(),
            embed_reg: default_embed_reg(),
            runs_dir: default_runs_dir(),
            resume: None,
            early_stopping_patience: None,
            loss_spike_threshold: default_loss_spike_threshold(),
            loss_spike_window: default_loss_spike_window(),
            max_checkpoints: default_max_checkpoints(),
            data: SyntheticDataConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Training triplets per regeneration window.
    pub fn num_triplets(&self) -> usize {
        self.num_classes * self.triplets_per_class
    }

    /// Held-out validation triplets.
    pub fn num_test_triplets(&self) -> usize {
        self.num_classes * self.test_triplets_per_class
    }

    /// Sampler slots per class: one per training batch, at least one.
    pub fn pool_size_per_unit(&self) -> usize {
        (self.num_triplets() / self.batch_size.max(1)).max(1)
    }

    /// Hard triplets requested at each regeneration.
    pub fn hard_count(&self) -> usize {
        (self.num_triplets() as f64 * self.hard_frac).floor() as usize
    }

    /// Directory holding this run's checkpoints and metrics.
    pub fn run_dir(&self) -> PathBuf {
        self.runs_dir.join(&self.name)
    }

    /// Reject settings that would make the run meaningless.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("test_batch_size", self.test_batch_size),
            ("knn_train_size", self.knn_train_size),
            ("knn_test_size", self.knn_test_size),
            ("knn_k", self.knn_k),
            ("epochs", self.epochs),
            ("log_interval", self.log_interval),
            ("triplet_freq", self.triplet_freq),
            ("triplets_per_class", self.triplets_per_class),
            ("test_triplets_per_class", self.test_triplets_per_class),
            ("embedding_dim", self.embedding_dim),
            ("max_checkpoints", self.max_checkpoints),
            ("loss_spike_window", self.loss_spike_window),
            ("data.input_dim", self.data.input_dim),
            ("data.examples_per_class", self.data.examples_per_class),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TripmineError::config(format!("{field} must be positive")));
        }
        if self.num_classes < 2 {
            return Err(TripmineError::config("num_classes must be at least 2"));
        }
        if self.data.examples_per_class < 2 {
            return Err(TripmineError::config(
                "data.examples_per_class must be at least 2 to form anchor/positive pairs",
            ));
        }
        if self.knn_k > self.knn_train_size {
            return Err(TripmineError::config(format!(
                "knn_k {} exceeds knn_train_size {}",
                self.knn_k, self.knn_train_size
            )));
        }
        if !(0.0..=1.0).contains(&self.hard_frac) {
            return Err(TripmineError::config(format!(
                "hard_frac must be within [0, 1], got {}",
                self.hard_frac
            )));
        }
        if self.margin.is_nan() || self.margin < 0.0 {
            return Err(TripmineError::config(format!(
                "margin must be non-negative, got {}",
                self.margin
            )));
        }
        if self.lr.is_nan() || self.lr <= 0.0 {
            return Err(TripmineError::config(format!(
                "lr must be positive, got {}",
                self.lr
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(TripmineError::config(format!(
                "momentum must be within [0, 1), got {}",
                self.momentum
            )));
        }
        if self.embed_reg.is_nan() || self.embed_reg < 0.0 {
            return Err(TripmineError::config("embed_reg must be non-negative"));
        }
        if !self.loss_spike_threshold.is_finite() || self.loss_spike_threshold <= 1.0 {
            return Err(TripmineError::config(format!(
                "loss_spike_threshold must be a finite multiple above 1, got {}",
                self.loss_spike_threshold
            )));
        }
        if self.name.trim().is_empty() {
            return Err(TripmineError::config("name must not be empty"));
        }
        Ok(())
    }
}

/// Settings for the Gaussian-cluster data generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticDataConfig {
    /// Raw feature dimension fed to the model.
    #[serde(default = "default_input_dim")]
    pub input_dim: usize,
    /// Examples generated per class for the triplet splits.
    #[serde(default = "default_examples_per_class")]
    pub examples_per_class: usize,
    /// Standard deviation of per-example noise around a class centroid.
    #[serde(default = "default_noise_std")]
    pub noise_std: f32,
    /// Standard deviation of the centroids themselves.
    #[serde(default = "default_class_spread")]
    pub class_spread: f32,
}

impl Default for SyntheticDataConfig {
    fn default() -> Self {
        Self {
            input_dim: default_input_dim(),
            examples_per_class: default_examples_per_class(),
            noise_std: default_noise_std(),
            class_spread: default_class_spread(),
        }
    }
}

fn default_name() -> String {
    "TripletNet".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_test_batch_size() -> usize {
    1000
}

fn default_knn_train_size() -> usize {
    1000
}

fn default_knn_test_size() -> usize {
    100
}

fn default_knn_k() -> usize {
    1
}

fn default_epochs() -> usize {
    1
}

fn default_lr() -> f32 {
    0.01
}

fn default_momentum() -> f32 {
    0.5
}

fn default_seed() -> u64 {
    1
}

fn default_log_interval() -> usize {
    20
}

fn default_margin() -> f32 {
    0.2
}

fn default_triplet_freq() -> usize {
    3
}

fn default_hard_frac() -> f64 {
    0.1
}

fn default_num_classes() -> usize {
    5
}

fn default_triplets_per_class() -> usize {
    64
}

fn default_test_triplets_per_class() -> usize {
    16
}

fn default_embedding_dim() -> usize {
    10
}

fn default_embed_reg() -> f32 {
    0.001
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("runs")
}

fn default_loss_spike_threshold() -> f64 {
    10.0
}

fn default_loss_spike_window() -> usize {
    5
}

fn default_max_checkpoints() -> usize {
    20
}

fn default_input_dim() -> usize {
    32
}

fn default_examples_per_class() -> usize {
    40
}

fn default_noise_std() -> f32 {
    1.0
}

fn default_class_spread() -> f32 {
    1.0
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (only the fields they serialize)
/// 2. Environment variables prefixed with `TRIPMINE_`, nested with `__`
/// 3. `config_path`, or `tripmine.toml` in `workspace` when no path is given
/// 4. Built-in defaults
///
/// The merged result is validated before it is returned.
pub fn load_config<O: Serialize>(
    workspace: Option<&Path>,
    config_path: Option<&Path>,
    overrides: Option<&O>,
) -> Result<TrainingConfig> {
    let mut figment = Figment::from(Serialized::defaults(TrainingConfig::default()));

    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(TripmineError::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(CONFIG_FILE);
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(ws_config));
                }
            }
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainingConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
