//! tripmine CLI: train triplet-loss embeddings with online hard-negative mining.

mod commands;

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// tripmine: triplet-loss training with hard-negative mining
#[derive(Parser, Debug)]
#[command(name = "tripmine", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds tripmine.toml and relative run directories)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train on synthetic class clusters
    Train(TrainArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default tripmine.toml into the workspace
    Init,
    /// Print the effective configuration as TOML
    Show,
}

/// Flags for `tripmine train`. Every set flag overrides the config file and
/// environment.
#[derive(clap::Args, Debug, Default, Serialize)]
struct TrainArgs {
    /// Input batch size for training
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<usize>,

    /// Input batch size for testing
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    test_batch_size: Option<usize>,

    /// Number of reference examples for kNN evaluation
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    knn_train_size: Option<usize>,

    /// Number of query examples for kNN evaluation
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    knn_test_size: Option<usize>,

    /// Neighbour count for kNN evaluation
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    knn_k: Option<usize>,

    /// Number of epochs to train
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    epochs: Option<usize>,

    /// Learning rate
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    lr: Option<f32>,

    /// SGD momentum
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    momentum: Option<f32>,

    /// Random seed
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,

    /// Batches between progress log lines
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    log_interval: Option<usize>,

    /// Triplet loss margin
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    margin: Option<f32>,

    /// Checkpoint to resume from
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    resume: Option<PathBuf>,

    /// Run name; checkpoints go to <runs-dir>/<name>/
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    /// Epochs between triplet regenerations
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    triplet_freq: Option<usize>,

    /// Fraction of regenerated triplets taken from the hard pool
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    hard_frac: Option<f64>,

    /// Number of classes used to build triplets
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_classes: Option<usize>,

    /// Output dimension of the embedding
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding_dim: Option<usize>,

    /// Directory holding run subdirectories
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    runs_dir: Option<PathBuf>,

    /// Stop after this many epochs without a validation accuracy gain
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    early_stopping_patience: Option<usize>,

    /// Stop when the training loss exceeds this multiple of its recent mean
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    loss_spike_threshold: Option<f64>,

    /// Epochs averaged for the loss spike check
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    loss_spike_window: Option<usize>,

    /// Append per-epoch metrics as JSON lines to this file
    #[arg(long)]
    #[serde(skip)]
    metrics_file: Option<PathBuf>,

    /// Print the training summary as JSON instead of text
    #[arg(long)]
    #[serde(skip)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "tripmine", "tripmine")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tripmine.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref())
}
