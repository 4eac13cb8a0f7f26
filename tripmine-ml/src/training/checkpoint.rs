//! Checkpoint storage for training runs.

use crate::error::{Result, TripmineError};
use crate::model::ModelState;
use crate::persistence::{copy_atomic, read_json, write_atomic, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";
pub const BEST_FILE: &str = "model_best.json";
pub const MANIFEST_FILE: &str = "checkpoints.json";

/// What the training loop persists after every epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Next epoch to run, 1-based.
    pub epoch: usize,
    pub model: ModelState,
    /// Best validation triplet accuracy so far.
    pub best_metric: f64,
}

pub trait CheckpointStore {
    fn save(&mut self, state: &TrainingState, is_best: bool) -> Result<()>;
}

/// Manifest entry for one saved checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: String,
    pub epoch: usize,
    pub best_metric: f64,
    pub is_best: bool,
    /// SHA-256 of the checkpoint file contents.
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Writes JSON checkpoints under one run directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    max_checkpoints: usize,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, max_checkpoints: usize) -> Result<Self> {
        if max_checkpoints == 0 {
            return Err(TripmineError::config("max_checkpoints must be positive"));
        }
        Ok(Self {
            dir: dir.into(),
            max_checkpoints,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    pub fn best_path(&self) -> PathBuf {
        self.dir.join(BEST_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Manifest entries, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointEntry>> {
        Ok(read_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Most recent entry that was marked best.
    pub fn best(&self) -> Result<Option<CheckpointEntry>> {
        Ok(self.list()?.into_iter().rev().find(|e| e.is_best))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&mut self, state: &TrainingState, is_best: bool) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let path = self.checkpoint_path();
        write_atomic(&path, &bytes)?;
        if is_best {
            copy_atomic(&path, &self.best_path())?;
        }

        let entry = CheckpointEntry {
            id: uuid::Uuid::new_v4().to_string(),
            epoch: state.epoch,
            best_metric: state.best_metric,
            is_best,
            hash: format!("{:x}", Sha256::digest(&bytes)),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let mut entries = self.list()?;
        entries.push(entry);
        if entries.len() > self.max_checkpoints {
            let excess = entries.len() - self.max_checkpoints;
            entries.drain(..excess);
        }
        write_json_atomic(&self.manifest_path(), &entries)?;

        tracing::debug!(
            path = %path.display(),
            epoch = state.epoch,
            is_best,
            "Saved checkpoint"
        );
        Ok(())
    }
}

/// Keeps saved states in memory; used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    saved: Vec<(TrainingState, bool)>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> &[(TrainingState, bool)] {
        &self.saved
    }

    pub fn latest(&self) -> Option<&TrainingState> {
        self.saved.last().map(|(state, _)| state)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, state: &TrainingState, is_best: bool) -> Result<()> {
        self.saved.push((state.clone(), is_best));
        Ok(())
    }
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for &mut S {
    fn save(&mut self, state: &TrainingState, is_best: bool) -> Result<()> {
        (**self).save(state, is_best)
    }
}

/// Read a checkpoint written by [`FileCheckpointStore`].
pub fn load_checkpoint(path: &Path) -> Result<TrainingState> {
    read_json(path)?.ok_or_else(|| {
        TripmineError::checkpoint(format!("no checkpoint found at {}", path.display()))
    })
}
