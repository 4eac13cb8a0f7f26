//! Metric sinks that receive per-epoch scalars.
//!
//! Recording never fails from the caller's side. Sinks log and count their
//! own write errors.

use crate::persistence::append_json_line;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One recorded scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub metric: String,
    pub split: String,
    pub epoch: usize,
    pub value: f64,
}

pub trait MetricsSink {
    fn record(&mut self, metric: &str, split: &str, epoch: usize, value: f64);
}

/// Keeps every point in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    points: Vec<MetricPoint>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Values of one metric/split series in recording order.
    pub fn series(&self, metric: &str, split: &str) -> Vec<(usize, f64)> {
        self.points
            .iter()
            .filter(|p| p.metric == metric && p.split == split)
            .map(|p| (p.epoch, p.value))
            .collect()
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, metric: &str, split: &str, epoch: usize, value: f64) {
        self.points.push(MetricPoint {
            metric: metric.to_string(),
            split: split.to_string(),
            epoch,
            value,
        });
    }
}

/// Emits each point as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&mut self, metric: &str, split: &str, epoch: usize, value: f64) {
        tracing::info!(target: "tripmine::metrics", metric, split, epoch, value, "metric");
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    run: &'a str,
    metric: &'a str,
    split: &'a str,
    epoch: usize,
    value: f64,
    recorded_at: DateTime<Utc>,
}

/// Appends one JSON object per point to a file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
    run: String,
    failures: usize,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>, run: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run: run.into(),
            failures: 0,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Writes that failed so far.
    pub fn failures(&self) -> usize {
        self.failures
    }
}

impl MetricsSink for JsonlSink {
    fn record(&mut self, metric: &str, split: &str, epoch: usize, value: f64) {
        let record = JsonlRecord {
            run: &self.run,
            metric,
            split,
            epoch,
            value,
            recorded_at: Utc::now(),
        };
        if let Err(e) = append_json_line(&self.path, &record) {
            self.failures += 1;
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to record metric");
        }
    }
}

/// Forwards every point to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn record(&mut self, metric: &str, split: &str, epoch: usize, value: f64) {
        for sink in &mut self.sinks {
            sink.record(metric, split, epoch, value);
        }
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for &mut S {
    fn record(&mut self, metric: &str, split: &str, epoch: usize, value: f64) {
        (**self).record(metric, split, epoch, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_series() {
        let mut sink = MemorySink::new();
        sink.record("acc", "train", 1, 0.5);
        sink.record("acc", "test", 1, 0.4);
        sink.record("acc", "train", 2, 0.7);
        assert_eq!(sink.series("acc", "train"), vec![(1, 0.5), (2, 0.7)]);
        assert_eq!(sink.points().len(), 3);
    }

    #[test]
    fn test_jsonl_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let mut sink = JsonlSink::new(&path, "demo");
        sink.record("loss", "train", 1, 0.25);
        sink.record("loss", "test", 1, 0.5);

        let content = std::fs::read_to_string(&path).unwrap();
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["run"], "demo");
        assert_eq!(first["metric"], "loss");
        assert_eq!(first["value"], 0.25);
        assert_eq!(content.lines().count(), 2);
        assert_eq!(sink.failures(), 0);
    }

    #[test]
    fn test_jsonl_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the append fail.
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let mut sink = JsonlSink::new(&path, "demo");
        sink.record("loss", "train", 1, 0.25);
        assert_eq!(sink.failures(), 1);
    }

    fn record_twice(mut sink: impl MetricsSink) {
        sink.record("acc", "test", 3, 0.9);
        sink.record("acc", "test", 4, 0.8);
    }

    #[test]
    fn test_borrowed_sink_keeps_points() {
        let mut memory = MemorySink::new();
        record_twice(&mut memory);
        assert_eq!(memory.series("acc", "test"), vec![(3, 0.9), (4, 0.8)]);
    }

    #[test]
    fn test_fanout() {
        let fan = FanoutSink::new().with(TracingSink).with(MemorySink::new());
        assert_eq!(fan.len(), 2);
        assert!(!fan.is_empty());
        record_twice(fan);
    }
}
