//! Training infrastructure: the epoch loop, metrics, sinks, checkpoints and callbacks.

pub mod callbacks;
pub mod checkpoint;
pub mod metrics;
pub mod seed;
pub mod setup;
pub mod sink;
pub mod trainer;

pub use callbacks::{CallbackAction, EarlyStopping, EpochCallback, LossAnomalyGuard};
pub use checkpoint::{
    CheckpointEntry, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, TrainingState,
    load_checkpoint,
};
pub use metrics::{AverageMeter, EpochReport, SplitMetrics, TrainingHistory, TrainingSummary};
pub use seed::SeedManager;
pub use setup::SyntheticRun;
pub use sink::{FanoutSink, JsonlSink, MemorySink, MetricPoint, MetricsSink, TracingSink};
pub use trainer::{KnnSplit, PassMetrics, Trainer};
