//! Per-stage sample aggregation
//!
//! A [`StageAggregator`] lives for one stage in one window. Reporting tasks
//! call [`record`](StageAggregator::record) concurrently; each aggregator owns
//! its own lock, so a burst of completions on one stage never contends with
//! another stage. [`finalize`](StageAggregator::finalize) freezes the
//! accumulator into an immutable [`StageSummary`]; later samples are dropped
//! and counted as late.
//!
//! # Example
//!
//! ```
//! use stagestats::stats::{Diagnostics, MetricSample, aggregator::StageAggregator};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let agg = StageAggregator::new(0, "read", Arc::new(Diagnostics::new()));
//! agg.record(MetricSample::new(0, 0, "n1").with_wall_time(Duration::from_millis(2))).unwrap();
//! agg.record(MetricSample::new(0, 1, "n2").with_wall_time(Duration::from_millis(4))).unwrap();
//!
//! let summary = agg.finalize(2).unwrap();
//! assert_eq!(summary.blocks_executed, 2);
//! assert_eq!(summary.distinct_node_count, 2);
//! assert_eq!(summary.wall_time.mean, 3_000_000.0);
//! ```

use super::{Diagnostics, MetricSample, RunningStats, StageId, StatSummary};
use crate::error::StatsError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Aggregated statistics for one stage in one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_name: String,
    pub blocks_executed: u64,
    pub blocks_expected: u64,
    pub wall_time: StatSummary,
    pub cpu_time: StatSummary,
    pub output_rows: StatSummary,
    pub output_bytes: StatSummary,
    /// Distribution of task counts across the nodes that ran the stage
    pub tasks_per_node: StatSummary,
    pub distinct_node_count: u64,
}

impl StageSummary {
    /// An all-zero summary for a stage that never reported
    pub fn empty(stage_name: impl Into<String>, blocks_expected: u64) -> Self {
        Self {
            stage_name: stage_name.into(),
            blocks_executed: 0,
            blocks_expected,
            wall_time: StatSummary::default(),
            cpu_time: StatSummary::default(),
            output_rows: StatSummary::default(),
            output_bytes: StatSummary::default(),
            tasks_per_node: StatSummary::default(),
            distinct_node_count: 0,
        }
    }

    /// True when fewer blocks reported than were expected
    pub fn is_partial(&self) -> bool {
        self.blocks_executed < self.blocks_expected
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    wall_time: RunningStats,
    cpu_time: RunningStats,
    output_rows: RunningStats,
    output_bytes: RunningStats,
    tasks_per_node: HashMap<String, u64>,
}

impl Accumulator {
    #[inline]
    fn fold(&mut self, sample: MetricSample) {
        self.wall_time.record(sample.wall_time_ns);
        self.cpu_time.record(sample.cpu_time_ns);
        self.output_rows.record(sample.output_rows);
        self.output_bytes.record(sample.output_bytes);
        *self.tasks_per_node.entry(sample.node_id).or_insert(0) += 1;
    }

    fn summarize(&self, stage_name: &str, blocks_expected: u64) -> StageSummary {
        let blocks_executed = self.wall_time.count();
        StageSummary {
            stage_name: stage_name.to_string(),
            blocks_executed,
            blocks_expected: blocks_expected.max(blocks_executed),
            wall_time: self.wall_time.summary(),
            cpu_time: self.cpu_time.summary(),
            output_rows: self.output_rows.summary(),
            output_bytes: self.output_bytes.summary(),
            tasks_per_node: StatSummary::from_values(self.tasks_per_node.values().copied()),
            distinct_node_count: self.tasks_per_node.len() as u64,
        }
    }
}

#[derive(Debug)]
enum AggregatorState {
    Open(Accumulator),
    Finalized(StageSummary),
}

/// Accumulates samples for one stage in one window
#[derive(Debug)]
pub struct StageAggregator {
    stage_id: StageId,
    stage_name: String,
    window_index: u64,
    state: Mutex<AggregatorState>,
    diagnostics: Arc<Diagnostics>,
}

impl StageAggregator {
    pub fn new(stage_id: StageId, stage_name: impl Into<String>, diagnostics: Arc<Diagnostics>) -> Self {
        Self::for_window(0, stage_id, stage_name, diagnostics)
    }

    pub fn for_window(
        window_index: u64,
        stage_id: StageId,
        stage_name: impl Into<String>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            stage_id,
            stage_name: stage_name.into(),
            window_index,
            state: Mutex::new(AggregatorState::Open(Accumulator::default())),
            diagnostics,
        }
    }

    pub fn stage_id(&self) -> StageId {
        self.stage_id
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    // Accumulators are updated field by field with no early exits, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold one sample into the running statistics
    ///
    /// Rejected samples (invalid, misrouted or late) leave the aggregator
    /// untouched and bump the matching diagnostic counter.
    pub fn record(&self, sample: MetricSample) -> Result<(), StatsError> {
        if let Err(e) = sample.validate() {
            self.diagnostics.invalid_samples.add(1);
            return Err(e);
        }
        if sample.stage_id != self.stage_id {
            self.diagnostics.invalid_samples.add(1);
            return Err(StatsError::InvalidSample(format!(
                "sample for stage {} routed to stage {} ({})",
                sample.stage_id, self.stage_id, self.stage_name
            )));
        }

        {
            let mut state = self.lock();
            if let AggregatorState::Open(acc) = &mut *state {
                acc.fold(sample);
                return Ok(());
            }
        }

        self.diagnostics.late_samples.add(1);
        tracing::warn!(
            window = self.window_index,
            stage = %self.stage_name,
            task_id = sample.task_id,
            "dropping sample for finalized stage"
        );
        Err(StatsError::LateSample {
            window_index: self.window_index,
            stage: self.stage_name.clone(),
        })
    }

    /// Current view of the stage without finalizing it
    pub fn peek(&self, blocks_expected: u64) -> StageSummary {
        match &*self.lock() {
            AggregatorState::Open(acc) => acc.summarize(&self.stage_name, blocks_expected),
            AggregatorState::Finalized(summary) => summary.clone(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(&*self.lock(), AggregatorState::Finalized(_))
    }

    /// Freeze the stage into its summary
    ///
    /// A stage with fewer samples than `blocks_expected` still produces a
    /// summary; the shortfall shows up as `executed/expected` in the report.
    pub fn finalize(&self, blocks_expected: u64) -> Result<StageSummary, StatsError> {
        let mut state = self.lock();
        let summary = match &*state {
            AggregatorState::Open(acc) => acc.summarize(&self.stage_name, blocks_expected),
            AggregatorState::Finalized(_) => {
                return Err(StatsError::AlreadyFinalized {
                    stage: self.stage_name.clone(),
                })
            }
        };
        *state = AggregatorState::Finalized(summary.clone());
        drop(state);

        if summary.is_partial() {
            self.diagnostics.partial_stages.add(1);
            tracing::warn!(
                window = self.window_index,
                stage = %self.stage_name,
                executed = summary.blocks_executed,
                expected = summary.blocks_expected,
                "stage finalized with missing samples"
            );
        } else if blocks_expected < summary.blocks_executed {
            tracing::debug!(
                stage = %self.stage_name,
                executed = summary.blocks_executed,
                expected = blocks_expected,
                "more samples than expected blocks, raising expected count"
            );
        }

        Ok(summary)
    }
}
