//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, TrainArgs};
use std::path::Path;
use tripmine_ml::config::{CONFIG_FILE, TrainingConfig, load_config};
use tripmine_ml::training::{
    FanoutSink, FileCheckpointStore, JsonlSink, LossAnomalyGuard, SyntheticRun, Trainer,
    TracingSink, TrainingSummary, load_checkpoint,
};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Train(args) => {
            let json = args.json;
            let summary = handle_train(args, workspace, config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config_path),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = workspace.join(CONFIG_FILE);
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&TrainingConfig::default())?;
            std::fs::write(&path, &toml_str)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config::<()>(Some(workspace), config_path, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Resolve the configuration, build the synthetic run and train it.
fn handle_train(
    args: TrainArgs,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<TrainingSummary> {
    let mut config = load_config(Some(workspace), config_path, Some(&args))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if config.runs_dir.is_relative() {
        config.runs_dir = workspace.join(&config.runs_dir);
    }

    let mut run = SyntheticRun::build(&config)?;
    let store = FileCheckpointStore::new(config.run_dir(), config.max_checkpoints)?;
    let mut sink = FanoutSink::new().with(TracingSink);
    if let Some(path) = &args.metrics_file {
        sink = sink.with(JsonlSink::new(workspace.join(path), &config.name));
    }

    let mut trainer = Trainer::new(config.clone())?
        .with_sink(sink)
        .with_store(store)
        .with_callback(LossAnomalyGuard::from_config(&config));

    if let Some(path) = &config.resume {
        let path = workspace.join(path);
        let state = load_checkpoint(&path)?;
        trainer.resume(&mut run.model, &state)?;
    }

    tracing::info!(
        name = %config.name,
        epochs = config.epochs,
        start_epoch = trainer.start_epoch(),
        run_dir = %config.run_dir().display(),
        "Starting training"
    );
    let summary = trainer.run(&mut run.model, &mut run.train, &run.test, &run.knn)?;
    Ok(summary)
}

fn print_summary(summary: &TrainingSummary) {
    println!("Epochs run:       {}", summary.epochs_run);
    println!("Best accuracy:    {:.2}%", 100.0 * summary.best_accuracy);
    if let Some(epoch) = summary.best_epoch {
        println!("Best epoch:       {epoch}");
    }
    if let Some(knn) = summary.final_knn_accuracy {
        println!("Final kNN acc:    {:.2}%", 100.0 * knn);
    }
    println!("Regenerations:    {}", summary.regenerations);
    if summary.stopped_early {
        println!("Stopped early.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn tiny_args() -> TrainArgs {
        TrainArgs {
            epochs: Some(2),
            batch_size: Some(8),
            num_classes: Some(3),
            knn_train_size: Some(30),
            knn_test_size: Some(10),
            triplet_freq: Some(1),
            embedding_dim: Some(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), None).unwrap();

        let content = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        let parsed: TrainingConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, TrainingConfig::default());
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "epochs = 7\n").unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "epochs = 7\n");
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path(), None).is_ok());
    }

    #[test]
    fn test_config_show_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path(), Some(missing.as_path())).is_err());
    }

    #[test]
    fn test_train_writes_run_directory() {
        let dir = TempDir::new().unwrap();
        let args = TrainArgs {
            metrics_file: Some(PathBuf::from("metrics.jsonl")),
            ..tiny_args()
        };
        let summary = handle_train(args, dir.path(), None).unwrap();
        assert_eq!(summary.epochs_run, 2);
        assert_eq!(summary.regenerations, 2);

        let run_dir = dir.path().join("runs").join("TripletNet");
        let state = load_checkpoint(&run_dir.join("checkpoint.json")).unwrap();
        assert_eq!(state.epoch, 3);
        let metrics = std::fs::read_to_string(dir.path().join("metrics.jsonl")).unwrap();
        assert_eq!(metrics.lines().count(), 12);
    }

    #[test]
    fn test_train_resumes_from_checkpoint() {
        let dir = TempDir::new().unwrap();
        handle_train(tiny_args(), dir.path(), None).unwrap();

        let args = TrainArgs {
            epochs: Some(3),
            resume: Some(PathBuf::from("runs/TripletNet/checkpoint.json")),
            ..tiny_args()
        };
        let summary = handle_train(args, dir.path(), None).unwrap();
        assert_eq!(summary.epochs_run, 1);
        assert_eq!(summary.history.epochs[0].epoch, 3);
    }

    #[test]
    fn test_train_reads_loss_spike_settings() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "loss_spike_threshold = 0.5\n",
        )
        .unwrap();
        assert!(handle_train(tiny_args(), dir.path(), None).is_err());

        let args = TrainArgs {
            loss_spike_threshold: Some(50.0),
            loss_spike_window: Some(2),
            ..tiny_args()
        };
        let summary = handle_train(args, dir.path(), None).unwrap();
        assert_eq!(summary.epochs_run, 2);
    }

    #[test]
    fn test_train_rejects_bad_hard_frac() {
        let dir = TempDir::new().unwrap();
        let args = TrainArgs {
            hard_frac: Some(1.5),
            ..tiny_args()
        };
        assert!(handle_train(args, dir.path(), None).is_err());
    }
}
