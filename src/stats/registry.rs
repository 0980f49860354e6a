//! Aggregator registry keyed by `(window_index, stage_id)`
//!
//! The registry is owned by a report builder ([`DatasetStats`] or
//! [`PipelineStats`]); there is no process-wide instance. Lookups take a
//! read lock on the window map and then on the window's stage list, clone the
//! stage's `Arc<StageAggregator>` and release both before recording, so the
//! only lock held while folding a sample is the aggregator's own.
//!
//! Closing a window drops its aggregators, keeping memory proportional to
//! the windows currently being executed rather than to pipeline length.
//!
//! [`DatasetStats`]: super::dataset::DatasetStats
//! [`PipelineStats`]: super::pipeline::PipelineStats

use super::aggregator::StageAggregator;
use super::dataset::StageReport;
use super::{Diagnostics, MetricSample, StageId};
use crate::error::StatsError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Declaration of a stage at window start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub name: String,
    /// Output reused from an earlier window; no samples are expected
    #[serde(default)]
    pub cached: bool,
    /// Blocks the engine will execute, when known up front
    #[serde(default)]
    pub blocks_expected: Option<u64>,
}

impl StagePlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cached: false,
            blocks_expected: None,
        }
    }

    pub fn cached(name: impl Into<String>) -> Self {
        Self {
            cached: true,
            ..Self::new(name)
        }
    }

    pub fn with_blocks(mut self, blocks: u64) -> Self {
        self.blocks_expected = Some(blocks);
        self
    }
}

#[derive(Debug, Clone)]
enum StageSlot {
    Active {
        aggregator: Arc<StageAggregator>,
        blocks_expected: Option<u64>,
    },
    Cached {
        name: String,
    },
}

impl StageSlot {
    fn name(&self) -> &str {
        match self {
            StageSlot::Active { aggregator, .. } => aggregator.stage_name(),
            StageSlot::Cached { name } => name,
        }
    }
}

#[derive(Debug, Default)]
struct WindowStages {
    stages: RwLock<Vec<StageSlot>>,
}

/// Live aggregators for the windows currently executing
#[derive(Debug)]
pub struct StatsRegistry {
    windows: RwLock<BTreeMap<u64, Arc<WindowStages>>>,
    diagnostics: Arc<Diagnostics>,
}

impl StatsRegistry {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            windows: RwLock::new(BTreeMap::new()),
            diagnostics,
        }
    }

    /// Registry with one window already open and no stages declared
    pub fn with_window(diagnostics: Arc<Diagnostics>, window_index: u64) -> Self {
        let mut windows = BTreeMap::new();
        windows.insert(window_index, Arc::new(WindowStages::default()));
        Self {
            windows: RwLock::new(windows),
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Open a window and declare its stages in execution order
    ///
    /// Opening a window that is already open adds nothing and fails.
    pub fn open_window(&self, window_index: u64, plans: &[StagePlan]) -> Result<(), StatsError> {
        let stages = Arc::new(WindowStages::default());
        {
            let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
            if windows.contains_key(&window_index) {
                return Err(StatsError::OutOfOrderWindow {
                    expected: windows.keys().next_back().map_or(0, |last| last + 1),
                    got: window_index,
                });
            }
            windows.insert(window_index, stages);
        }
        for plan in plans {
            self.declare_stage(window_index, plan.clone())?;
        }
        Ok(())
    }

    /// Append a stage to an open window, returning its stage id
    pub fn declare_stage(&self, window_index: u64, plan: StagePlan) -> Result<StageId, StatsError> {
        let window = self.window(window_index)?;
        let mut stages = window.stages.write().unwrap_or_else(PoisonError::into_inner);
        let stage_id = stages.len();

        let slot = if plan.cached {
            StageSlot::Cached { name: plan.name }
        } else {
            StageSlot::Active {
                aggregator: Arc::new(StageAggregator::for_window(
                    window_index,
                    stage_id,
                    plan.name,
                    self.diagnostics.clone(),
                )),
                blocks_expected: plan.blocks_expected,
            }
        };
        stages.push(slot);
        Ok(stage_id)
    }

    pub fn is_open(&self, window_index: u64) -> bool {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&window_index)
    }

    fn window(&self, window_index: u64) -> Result<Arc<WindowStages>, StatsError> {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&window_index)
            .cloned()
            .ok_or(StatsError::WindowNotOpen(window_index))
    }

    fn slot(&self, window_index: u64, stage_id: StageId) -> Result<StageSlot, StatsError> {
        let window = self.window(window_index)?;
        let stages = window.stages.read().unwrap_or_else(PoisonError::into_inner);
        stages
            .get(stage_id)
            .cloned()
            .ok_or(StatsError::UnknownStage { window_index, stage_id })
    }

    /// Route a sample to its stage aggregator
    pub fn record(&self, window_index: u64, stage_id: StageId, sample: MetricSample) -> Result<(), StatsError> {
        let slot = match self.slot(window_index, stage_id) {
            Ok(slot) => slot,
            Err(e) => {
                self.diagnostics.invalid_samples.add(1);
                return Err(e);
            }
        };
        match slot {
            StageSlot::Active { aggregator, .. } => aggregator.record(sample),
            StageSlot::Cached { name } => {
                self.diagnostics.cached_samples.add(1);
                tracing::debug!(window = window_index, stage = %name, "ignoring sample for cached stage");
                Err(StatsError::CachedStage {
                    window_index,
                    stage: name,
                })
            }
        }
    }

    /// Record a burst of samples in parallel, routed by `sample.stage_id`
    ///
    /// Returns the rejected samples' errors; accepted samples are folded.
    pub fn record_batch(&self, window_index: u64, samples: Vec<MetricSample>) -> Vec<StatsError> {
        samples
            .into_par_iter()
            .filter_map(|sample| self.record(window_index, sample.stage_id, sample).err())
            .collect()
    }

    /// Finalize one stage
    ///
    /// `blocks_expected` falls back to the count declared in the stage plan,
    /// then to the number of samples received.
    pub fn finalize_stage(
        &self,
        window_index: u64,
        stage_id: StageId,
        blocks_expected: Option<u64>,
    ) -> Result<StageReport, StatsError> {
        match self.slot(window_index, stage_id)? {
            StageSlot::Active {
                aggregator,
                blocks_expected: planned,
            } => {
                let expected = blocks_expected.or(planned).unwrap_or(0);
                aggregator.finalize(expected).map(StageReport::Executed)
            }
            StageSlot::Cached { name } => Ok(StageReport::Cached { stage_name: name }),
        }
    }

    /// Stage reports for a window, finalizing nothing
    ///
    /// Stages still collecting samples appear with their current counts.
    pub fn stage_reports(&self, window_index: u64) -> Result<Vec<StageReport>, StatsError> {
        let window = self.window(window_index)?;
        let stages = window.stages.read().unwrap_or_else(PoisonError::into_inner);
        Ok(stages.iter().map(Self::report_for).collect())
    }

    fn report_for(slot: &StageSlot) -> StageReport {
        match slot {
            StageSlot::Active {
                aggregator,
                blocks_expected,
            } => StageReport::Executed(aggregator.peek(blocks_expected.unwrap_or(0))),
            StageSlot::Cached { name } => StageReport::Cached {
                stage_name: name.clone(),
            },
        }
    }

    /// Finalize every still-open stage with whatever samples arrived
    pub fn finalize_window(&self, window_index: u64) -> Result<Vec<StageReport>, StatsError> {
        let window = self.window(window_index)?;
        let stages = window.stages.read().unwrap_or_else(PoisonError::into_inner);

        let mut reports = Vec::with_capacity(stages.len());
        for slot in stages.iter() {
            let report = match slot {
                StageSlot::Active {
                    aggregator,
                    blocks_expected,
                } if !aggregator.is_finalized() => {
                    let expected = blocks_expected.unwrap_or(0);
                    match aggregator.finalize(expected) {
                        Ok(summary) => StageReport::Executed(summary),
                        // Lost a race with a concurrent finalize
                        Err(_) => Self::report_for(slot),
                    }
                }
                _ => Self::report_for(slot),
            };
            reports.push(report);
        }
        Ok(reports)
    }

    /// Names of stages marked cached in a window
    pub fn cached_stages(&self, window_index: u64) -> Result<Vec<String>, StatsError> {
        let window = self.window(window_index)?;
        let stages = window.stages.read().unwrap_or_else(PoisonError::into_inner);
        Ok(stages
            .iter()
            .filter(|s| matches!(s, StageSlot::Cached { .. }))
            .map(|s| s.name().to_string())
            .collect())
    }

    /// Drop a window's aggregators
    pub fn close_window(&self, window_index: u64) -> Result<(), StatsError> {
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&window_index)
            .map(|_| ())
            .ok_or(StatsError::WindowNotOpen(window_index))
    }

    pub fn open_windows(&self) -> usize {
        self.windows.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
