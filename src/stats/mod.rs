//! Statistics collection
//!
//! Per-task metric samples, running min/max/mean/total accumulators and the
//! report structures built from them.
//!
//! # Layout
//!
//! - [`aggregator`]: one [`StageAggregator`](aggregator::StageAggregator) per
//!   stage per window, folding samples into a `StageSummary`
//! - [`iterator`]: wall-clock accounting of the consuming loop
//! - [`registry`]: aggregators keyed by `(window_index, stage_id)`
//! - [`dataset`]: single-dataset report and builder
//! - [`window`]: append-only per-window history
//! - [`pipeline`]: multi-window report and builder
//!
//! # Example
//!
//! ```
//! use stagestats::stats::{MetricSample, dataset::DatasetStats};
//! use stagestats::stats::registry::StagePlan;
//! use std::time::Duration;
//!
//! let ds = DatasetStats::new(stagestats::util::time::monotonic());
//! let read = ds.declare_stage(StagePlan::new("read").with_blocks(1)).unwrap();
//!
//! let sample = MetricSample::new(read, 0, "node-1")
//!     .with_wall_time(Duration::from_millis(3))
//!     .with_output(100, 800);
//! ds.record(read, sample).unwrap();
//! ds.finalize_stage(read).unwrap();
//!
//! assert!(ds.stats().starts_with("Stage 0 read: 1/1 blocks executed in 3.00ms"));
//! ```

pub mod aggregator;
pub mod dataset;
pub mod iterator;
pub mod pipeline;
pub mod registry;
pub mod window;

use crate::error::StatsError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Index of a stage within its dataset, in declaration order
pub type StageId = usize;

/// Cache-line aligned atomic counter to prevent false sharing
///
/// Diagnostic counters are bumped from whichever reporting path hits the
/// condition, so each one sits on its own 64-byte line.
///
/// ```text
/// [value: 8 bytes][padding: 56 bytes] = 64 bytes total
/// ```
#[repr(align(64))]
#[derive(Debug)]
pub struct AlignedCounter {
    value: AtomicU64,
    _padding: [u8; 56],
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; 56],
        }
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for AlignedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for non-fatal anomalies
///
/// None of these abort anything; they are surfaced in the JSON report and in
/// logs so that dropped data is never silent.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Samples that arrived after their stage was finalized
    pub late_samples: AlignedCounter,
    /// Samples addressed to a stage marked cached for the window
    pub cached_samples: AlignedCounter,
    /// Samples rejected by validation or addressed to unknown stages
    pub invalid_samples: AlignedCounter,
    /// Stages finalized with fewer blocks than expected
    pub partial_stages: AlignedCounter,
    /// Phase measurements whose end preceded their start
    pub clock_regressions: AlignedCounter,
    /// `exit` calls that did not match the active phase
    pub unmatched_phase_exits: AlignedCounter,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            late_samples: self.late_samples.get(),
            cached_samples: self.cached_samples.get(),
            invalid_samples: self.invalid_samples.get(),
            partial_stages: self.partial_stages.get(),
            clock_regressions: self.clock_regressions.get(),
            unmatched_phase_exits: self.unmatched_phase_exits.get(),
        }
    }
}

/// Point-in-time copy of [`Diagnostics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub late_samples: u64,
    pub cached_samples: u64,
    pub invalid_samples: u64,
    pub partial_stages: u64,
    pub clock_regressions: u64,
    pub unmatched_phase_exits: u64,
}

/// One task's reported measurements
///
/// Durations are carried as integer nanoseconds, so negative or NaN timings
/// cannot be represented; raw float reports go through
/// [`RawTaskMetrics`] and are validated on conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSample {
    pub stage_id: StageId,
    pub task_id: u64,
    pub node_id: String,
    pub wall_time_ns: u64,
    pub cpu_time_ns: u64,
    pub output_rows: u64,
    pub output_bytes: u64,
}

impl MetricSample {
    pub fn new(stage_id: StageId, task_id: u64, node_id: impl Into<String>) -> Self {
        Self {
            stage_id,
            task_id,
            node_id: node_id.into(),
            wall_time_ns: 0,
            cpu_time_ns: 0,
            output_rows: 0,
            output_bytes: 0,
        }
    }

    pub fn with_wall_time(mut self, wall: Duration) -> Self {
        self.wall_time_ns = wall.as_nanos() as u64;
        self
    }

    pub fn with_cpu_time(mut self, cpu: Duration) -> Self {
        self.cpu_time_ns = cpu.as_nanos() as u64;
        self
    }

    pub fn with_output(mut self, rows: u64, bytes: u64) -> Self {
        self.output_rows = rows;
        self.output_bytes = bytes;
        self
    }

    /// Reject samples that cannot be attributed to a node
    pub fn validate(&self) -> Result<(), StatsError> {
        if self.node_id.trim().is_empty() {
            return Err(StatsError::InvalidSample(format!(
                "task {} of stage {} reported an empty node id",
                self.task_id, self.stage_id
            )));
        }
        Ok(())
    }
}

/// Task metrics as reported by a remote task, before validation
///
/// Timings are float seconds and counts are signed, matching what a task
/// process measures and ships; `MetricSample::try_from` rejects anything
/// that is negative, NaN or infinite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTaskMetrics {
    pub stage_id: StageId,
    pub task_id: u64,
    pub node_id: String,
    pub wall_time_s: f64,
    pub cpu_time_s: f64,
    pub output_rows: i64,
    pub output_bytes: i64,
}

fn seconds_to_nanos(field: &str, task_id: u64, secs: f64) -> Result<u64, StatsError> {
    Duration::try_from_secs_f64(secs)
        .map(|d| d.as_nanos() as u64)
        .map_err(|_| {
            StatsError::InvalidSample(format!("task {}: {} = {} is not a valid duration", task_id, field, secs))
        })
}

fn non_negative(field: &str, task_id: u64, value: i64) -> Result<u64, StatsError> {
    u64::try_from(value).map_err(|_| {
        StatsError::InvalidSample(format!("task {}: {} = {} is negative", task_id, field, value))
    })
}

impl TryFrom<RawTaskMetrics> for MetricSample {
    type Error = StatsError;

    fn try_from(raw: RawTaskMetrics) -> Result<Self, Self::Error> {
        let sample = MetricSample {
            stage_id: raw.stage_id,
            task_id: raw.task_id,
            wall_time_ns: seconds_to_nanos("wall_time_s", raw.task_id, raw.wall_time_s)?,
            cpu_time_ns: seconds_to_nanos("cpu_time_s", raw.task_id, raw.cpu_time_s)?,
            output_rows: non_negative("output_rows", raw.task_id, raw.output_rows)?,
            output_bytes: non_negative("output_bytes", raw.task_id, raw.output_bytes)?,
            node_id: raw.node_id,
        };
        sample.validate()?;
        Ok(sample)
    }
}

/// Min / max / mean / total over a set of values
///
/// With no values every field is zero, never NaN.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatSummary {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub total: u64,
    pub count: u64,
}

impl StatSummary {
    /// Summarize an arbitrary set of values
    pub fn from_values<I: IntoIterator<Item = u64>>(values: I) -> Self {
        let mut running = RunningStats::new();
        for v in values {
            running.record(v);
        }
        running.summary()
    }
}

/// O(1) running accumulator behind [`StatSummary`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    count: u64,
    min: u64,
    max: u64,
    sum: u64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum = self.sum.saturating_add(value);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn summary(&self) -> StatSummary {
        if self.count == 0 {
            return StatSummary::default();
        }
        StatSummary {
            min: self.min,
            max: self.max,
            mean: self.sum as f64 / self.count as f64,
            total: self.sum,
            count: self.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_counter_layout() {
        assert_eq!(std::mem::size_of::<AlignedCounter>(), 64);
        assert_eq!(std::mem::align_of::<AlignedCounter>(), 64);

        let counter = AlignedCounter::new();
        counter.add(3);
        counter.add(4);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_running_stats_empty_is_zero() {
        let summary = RunningStats::new().summary();
        assert_eq!(summary, StatSummary::default());
        assert_eq!(summary.mean, 0.0);
        assert!(!summary.mean.is_nan());
    }

    #[test]
    fn test_running_stats_mean_identity() {
        let values = [5u64, 17, 3, 99, 42, 0, 8];
        let summary = StatSummary::from_values(values);

        assert_eq!(summary.min, 0);
        assert_eq!(summary.max, 99);
        assert_eq!(summary.total, 174);
        assert_eq!(summary.count, 7);
        assert!((summary.mean - summary.total as f64 / summary.count as f64).abs() < 1e-9);
    }

    #[test]
    fn test_sample_builder() {
        let sample = MetricSample::new(2, 7, "node-a")
            .with_wall_time(Duration::from_millis(4))
            .with_cpu_time(Duration::from_millis(3))
            .with_output(10, 80);

        assert_eq!(sample.wall_time_ns, 4_000_000);
        assert_eq!(sample.cpu_time_ns, 3_000_000);
        assert_eq!(sample.output_rows, 10);
        assert_eq!(sample.output_bytes, 80);
        assert!(sample.validate().is_ok());
    }

    #[test]
    fn test_empty_node_id_rejected() {
        let sample = MetricSample::new(0, 1, "  ");
        assert!(matches!(sample.validate(), Err(StatsError::InvalidSample(_))));
    }

    fn raw() -> RawTaskMetrics {
        RawTaskMetrics {
            stage_id: 1,
            task_id: 9,
            node_id: "10.0.1.10".to_string(),
            wall_time_s: 0.25,
            cpu_time_s: 0.125,
            output_rows: 100,
            output_bytes: 800,
        }
    }

    #[test]
    fn test_raw_conversion() {
        let sample = MetricSample::try_from(raw()).unwrap();
        assert_eq!(sample.wall_time_ns, 250_000_000);
        assert_eq!(sample.cpu_time_ns, 125_000_000);
        assert_eq!(sample.output_rows, 100);
        assert_eq!(sample.node_id, "10.0.1.10");
    }

    #[test]
    fn test_raw_conversion_rejects_malformed() {
        let mut nan = raw();
        nan.wall_time_s = f64::NAN;
        assert!(MetricSample::try_from(nan).is_err());

        let mut negative_time = raw();
        negative_time.cpu_time_s = -0.5;
        assert!(MetricSample::try_from(negative_time).is_err());

        let mut negative_rows = raw();
        negative_rows.output_rows = -1;
        assert!(MetricSample::try_from(negative_rows).is_err());

        let mut infinite = raw();
        infinite.wall_time_s = f64::INFINITY;
        assert!(MetricSample::try_from(infinite).is_err());
    }

    #[test]
    fn test_diagnostics_snapshot() {
        let diag = Diagnostics::new();
        diag.late_samples.add(2);
        diag.clock_regressions.add(1);

        let snap = diag.snapshot();
        assert_eq!(snap.late_samples, 2);
        assert_eq!(snap.clock_regressions, 1);
        assert_eq!(snap.cached_samples, 0);
    }
}
