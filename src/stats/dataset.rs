//! Single-dataset stats
//!
//! [`DatasetStatsReport`] is the immutable per-dataset (or per-window) report:
//! stage reports in execution order plus one iterator time snapshot.
//! [`DatasetStats`] builds one for a dataset that is not part of a pipeline.

use super::aggregator::StageSummary;
use super::iterator::{IteratorTimeTracker, IteratorTimes};
use super::registry::{StagePlan, StatsRegistry};
use super::{Diagnostics, DiagnosticsSnapshot, MetricSample, StageId};
use crate::error::StatsError;
use crate::util::time::SharedClock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Report for one stage: either executed, or reused from an earlier window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageReport {
    Executed(StageSummary),
    Cached { stage_name: String },
}

impl StageReport {
    pub fn stage_name(&self) -> &str {
        match self {
            StageReport::Executed(summary) => &summary.stage_name,
            StageReport::Cached { stage_name } => stage_name,
        }
    }

    pub fn summary(&self) -> Option<&StageSummary> {
        match self {
            StageReport::Executed(summary) => Some(summary),
            StageReport::Cached { .. } => None,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, StageReport::Cached { .. })
    }
}

/// Stages of one dataset in execution order plus its iterator breakdown
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetStatsReport {
    pub stages: Vec<StageReport>,
    pub iterator: IteratorTimes,
}

impl DatasetStatsReport {
    pub fn new(stages: Vec<StageReport>, iterator: IteratorTimes) -> Self {
        Self { stages, iterator }
    }

    /// Render as the canonical text report
    pub fn to_text(&self) -> String {
        crate::output::text::render_dataset(self)
    }
}

// A standalone dataset is window 0 of a registry nobody else shares.
const DATASET_WINDOW: u64 = 0;

/// Stats builder for one (non-pipelined) dataset
///
/// Stages are declared as they start executing; samples may be recorded from
/// any thread. `stats()` is safe to call at any point, including before any
/// sample arrived, and renders unfinalized stages with their current counts.
#[derive(Debug)]
pub struct DatasetStats {
    registry: StatsRegistry,
    iterator: IteratorTimeTracker,
    diagnostics: Arc<Diagnostics>,
}

impl DatasetStats {
    pub fn new(clock: SharedClock) -> Self {
        let diagnostics = Arc::new(Diagnostics::new());
        let registry = StatsRegistry::with_window(diagnostics.clone(), DATASET_WINDOW);

        Self {
            registry,
            iterator: IteratorTimeTracker::with_diagnostics(clock, diagnostics.clone()),
            diagnostics,
        }
    }

    /// Declare the next stage; ids follow declaration order
    pub fn declare_stage(&self, plan: StagePlan) -> Result<StageId, StatsError> {
        self.registry.declare_stage(DATASET_WINDOW, plan)
    }

    pub fn record(&self, stage_id: StageId, sample: MetricSample) -> Result<(), StatsError> {
        self.registry.record(DATASET_WINDOW, stage_id, sample)
    }

    /// Record many samples concurrently; returns the rejections
    pub fn record_batch(&self, samples: Vec<MetricSample>) -> Vec<StatsError> {
        self.registry.record_batch(DATASET_WINDOW, samples)
    }

    /// Finalize a stage using the block count from its plan
    pub fn finalize_stage(&self, stage_id: StageId) -> Result<StageReport, StatsError> {
        self.registry.finalize_stage(DATASET_WINDOW, stage_id, None)
    }

    /// Finalize a stage with an explicit expected block count
    pub fn finalize_stage_with(&self, stage_id: StageId, blocks_expected: u64) -> Result<StageReport, StatsError> {
        self.registry
            .finalize_stage(DATASET_WINDOW, stage_id, Some(blocks_expected))
    }

    /// Iterator tracker for the consuming loop
    pub fn iterator(&self) -> &IteratorTimeTracker {
        &self.iterator
    }

    /// Current report
    pub fn report(&self) -> DatasetStatsReport {
        let stages = self
            .registry
            .stage_reports(DATASET_WINDOW)
            .unwrap_or_default();
        DatasetStatsReport::new(stages, self.iterator.snapshot())
    }

    /// Finalize remaining stages with whatever arrived and return the report
    pub fn finish(&self) -> DatasetStatsReport {
        let stages = self
            .registry
            .finalize_window(DATASET_WINDOW)
            .unwrap_or_default();
        DatasetStatsReport::new(stages, self.iterator.snapshot())
    }

    /// Canonical text report
    pub fn stats(&self) -> String {
        self.report().to_text()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}
