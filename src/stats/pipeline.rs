//! Multi-window pipeline stats
//!
//! A pipeline executes its stages once per window. The consuming loop drives
//! the window lifecycle explicitly:
//!
//! 1. [`begin_window`](PipelineStats::begin_window) when the window becomes
//!    available, declaring its stages (cached or not). The time since the
//!    previous window completed is recorded as stall time.
//! 2. [`record`](PipelineStats::record) / [`finalize_stage`](PipelineStats::finalize_stage)
//!    from the reporting paths, concurrently.
//! 3. [`complete_window`](PipelineStats::complete_window) once the window is
//!    fully consumed (or abandoned). Stages still open are finalized with
//!    whatever arrived, so an early stop shows up as `executed < expected`
//!    rather than as a missing window.
//!
//! Reports only ever contain completed windows. Each split branch owns its
//! own `PipelineStats`; branches share nothing but the clock.
//!
//! # Example
//!
//! ```
//! use stagestats::stats::pipeline::PipelineStats;
//! use stagestats::stats::registry::StagePlan;
//! use stagestats::util::time::monotonic;
//!
//! let pipe = PipelineStats::new(monotonic());
//! for window in 0..2 {
//!     let read = if window == 0 { StagePlan::new("read") } else { StagePlan::cached("read") };
//!     pipe.begin_window(window, &[read]).unwrap();
//!     pipe.complete_window(window).unwrap();
//! }
//!
//! let text = pipe.stats();
//! assert!(text.contains("== Pipeline Window 1 ==\nStage 0 read: [execution cached]\n"));
//! assert!(text.contains("##### Overall Pipeline Time Breakdown #####"));
//! ```

use super::dataset::{DatasetStatsReport, StageReport};
use super::iterator::IteratorTimeTracker;
use super::registry::{StagePlan, StatsRegistry};
use super::window::{WindowEntry, WindowHistory};
use super::{Diagnostics, DiagnosticsSnapshot, MetricSample, RawTaskMetrics, StageId, StatSummary};
use crate::error::StatsError;
use crate::util::time::SharedClock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Rendered-ready snapshot of a pipeline's completed windows
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineStatsReport {
    pub windows: Vec<WindowEntry>,
    /// Consumer stall time across windows 1..N
    pub stall: StatSummary,
    /// Wait + get + format time summed over all windows
    pub iterator_time_ns: u64,
    /// User code time summed over all windows
    pub user_time_ns: u64,
    /// Wall time from the first window's start to the last completion
    pub total_time_ns: u64,
}

impl PipelineStatsReport {
    pub fn to_text(&self) -> String {
        crate::output::text::render_pipeline(self)
    }
}

#[derive(Debug)]
struct OpenWindow {
    tracker: Arc<IteratorTimeTracker>,
    stall_ns: u64,
}

#[derive(Debug, Default)]
struct PipelineState {
    history: WindowHistory,
    open: BTreeMap<u64, OpenWindow>,
    next_begin: u64,
    started_at: Option<u64>,
    last_completed_at: Option<u64>,
}

/// Stats builder for a pipeline or one split branch of it
#[derive(Debug)]
pub struct PipelineStats {
    clock: SharedClock,
    registry: StatsRegistry,
    diagnostics: Arc<Diagnostics>,
    state: Mutex<PipelineState>,
}

impl PipelineStats {
    pub fn new(clock: SharedClock) -> Self {
        let diagnostics = Arc::new(Diagnostics::new());
        Self {
            clock,
            registry: StatsRegistry::new(diagnostics.clone()),
            diagnostics,
            state: Mutex::new(PipelineState::default()),
        }
    }

    /// Independent stats for `n` split branches
    pub fn split(&self, n: usize) -> Vec<PipelineStats> {
        (0..n).map(|_| PipelineStats::new(self.clock.clone())).collect()
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the next window and return its iterator tracker
    ///
    /// Windows begin in strictly increasing order. A window may begin before
    /// the previous one completes (prefetch); its stall time is then zero.
    pub fn begin_window(
        &self,
        window_index: u64,
        plans: &[StagePlan],
    ) -> Result<Arc<IteratorTimeTracker>, StatsError> {
        let now = self.clock.now_nanos();
        let mut state = self.lock();

        if window_index != state.next_begin {
            return Err(StatsError::OutOfOrderWindow {
                expected: state.next_begin,
                got: window_index,
            });
        }
        self.registry.open_window(window_index, plans)?;

        let previous_done = state.history.next_index() == window_index;
        let stall_ns = match state.last_completed_at {
            Some(done_at) if window_index > 0 && previous_done => now.saturating_sub(done_at),
            _ => 0,
        };

        let tracker = Arc::new(IteratorTimeTracker::with_diagnostics(
            self.clock.clone(),
            self.diagnostics.clone(),
        ));
        state.open.insert(
            window_index,
            OpenWindow {
                tracker: tracker.clone(),
                stall_ns,
            },
        );
        state.started_at.get_or_insert(now);
        state.next_begin += 1;

        tracing::debug!(window = window_index, stages = plans.len(), stall_ns, "window started");
        Ok(tracker)
    }

    /// Declare an extra stage in an open window
    pub fn declare_stage(&self, window_index: u64, plan: StagePlan) -> Result<StageId, StatsError> {
        self.registry.declare_stage(window_index, plan)
    }

    pub fn record(&self, window_index: u64, stage_id: StageId, sample: MetricSample) -> Result<(), StatsError> {
        self.registry.record(window_index, stage_id, sample)
    }

    /// Record metrics as a task reported them, routed by `raw.stage_id`
    pub fn record_raw(&self, window_index: u64, raw: RawTaskMetrics) -> Result<(), StatsError> {
        let sample = MetricSample::try_from(raw).map_err(|e| {
            self.diagnostics.invalid_samples.add(1);
            e
        })?;
        self.registry.record(window_index, sample.stage_id, sample)
    }

    pub fn record_batch(&self, window_index: u64, samples: Vec<MetricSample>) -> Vec<StatsError> {
        self.registry.record_batch(window_index, samples)
    }

    pub fn finalize_stage(
        &self,
        window_index: u64,
        stage_id: StageId,
        blocks_expected: Option<u64>,
    ) -> Result<StageReport, StatsError> {
        self.registry.finalize_stage(window_index, stage_id, blocks_expected)
    }

    /// Iterator tracker of an open window
    pub fn iterator(&self, window_index: u64) -> Option<Arc<IteratorTimeTracker>> {
        self.lock().open.get(&window_index).map(|w| w.tracker.clone())
    }

    /// Freeze a fully consumed window into the history
    ///
    /// Must be called in window order: completing anything but the oldest
    /// uncompleted window fails with [`StatsError::OutOfOrderWindow`].
    pub fn complete_window(&self, window_index: u64) -> Result<(), StatsError> {
        let mut state = self.lock();

        let expected = state.history.next_index();
        if window_index != expected {
            return Err(StatsError::OutOfOrderWindow {
                expected,
                got: window_index,
            });
        }
        if !state.open.contains_key(&window_index) {
            return Err(StatsError::WindowNotOpen(window_index));
        }

        let stages = self.registry.finalize_window(window_index)?;
        let open = state
            .open
            .remove(&window_index)
            .ok_or(StatsError::WindowNotOpen(window_index))?;
        let report = DatasetStatsReport::new(stages, open.tracker.snapshot());

        state
            .history
            .append(WindowEntry::new(window_index, report).with_stall(open.stall_ns))?;
        self.registry.close_window(window_index)?;
        state.last_completed_at = Some(self.clock.now_nanos());

        Ok(())
    }

    pub fn completed_windows(&self) -> usize {
        self.lock().history.len()
    }

    /// Snapshot of all completed windows plus pipeline totals
    pub fn report(&self) -> PipelineStatsReport {
        let state = self.lock();
        let totals = state.history.iterator_totals();
        let total_time_ns = match (state.started_at, state.last_completed_at) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            _ => 0,
        };

        PipelineStatsReport {
            windows: state.history.entries().to_vec(),
            stall: state.history.stall_summary(),
            iterator_time_ns: totals.iterator_ns(),
            user_time_ns: totals.user_ns,
            total_time_ns,
        }
    }

    /// Canonical text report
    pub fn stats(&self) -> String {
        self.report().to_text()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}
