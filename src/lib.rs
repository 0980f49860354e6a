//! stagestats - per-stage execution stats for windowed dataset pipelines
//!
//! A stage-based dataset engine executes each stage as many parallel tasks,
//! one per block. This crate folds the per-task metrics into per-stage
//! summaries, tracks where the consuming iterator spends its time, and
//! renders both as a fixed-layout text report (plus an equivalent JSON
//! document).
//!
//! # Architecture
//!
//! - **Samples and aggregation**: `MetricSample`s fold into a `StageAggregator`
//!   per (window, stage) through the `StatsRegistry`
//! - **Iterator accounting**: `IteratorTimeTracker` splits consumer time into
//!   wait / get / format / user phases
//! - **Datasets and pipelines**: `DatasetStats` for one dataset,
//!   `PipelineStats` for windowed execution with cached stages, stall time
//!   and split branches
//! - **Transport**: length-prefixed MessagePack frames applied by an async
//!   collector
//! - **Simulation**: a seeded engine that exercises all of the above

pub mod config;
pub mod distributed;
pub mod error;
pub mod logging;
pub mod output;
pub mod sim;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use error::{StatsError, StatsResult};
pub use stats::dataset::{DatasetStats, DatasetStatsReport, StageReport};
pub use stats::iterator::{IteratorTimeTracker, Phase};
pub use stats::pipeline::{PipelineStats, PipelineStatsReport};
pub use stats::registry::StagePlan;
pub use stats::MetricSample;

/// Result type used for application-level operations
pub type Result<T> = anyhow::Result<T>;
