//! Consumer-side iterator time accounting
//!
//! The consuming loop spends its time in exactly one of four phases at any
//! instant. [`IteratorTimeTracker`] accumulates nanoseconds per phase; entering
//! a phase while another is still open closes the open one first, so phases
//! never overlap and no interval is counted twice.
//!
//! Snapshots may be taken from another thread while the loop runs. All four
//! accumulators live behind one lock, so a snapshot is never torn, and each
//! field is reported as a running high-water mark so successive snapshots
//! never go backwards.
//!
//! # Example
//!
//! ```
//! use stagestats::stats::iterator::{IteratorTimeTracker, Phase};
//! use stagestats::util::time::ManualClock;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let tracker = IteratorTimeTracker::new(clock.clone());
//!
//! {
//!     let _wait = tracker.time(Phase::Wait);
//!     clock.advance(Duration::from_millis(3));
//! }
//! tracker.enter(Phase::User);
//! clock.advance(Duration::from_millis(1));
//! tracker.exit(Phase::User);
//!
//! let times = tracker.snapshot();
//! assert_eq!(times.wait_ns, 3_000_000);
//! assert_eq!(times.user_ns, 1_000_000);
//! assert_eq!(times.total_ns, 4_000_000);
//! ```

use super::Diagnostics;
use crate::util::time::SharedClock;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mutually exclusive phases of the consuming loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Blocked until the next task result is ready
    Wait,
    /// Fetching and deserializing a ready result
    Get,
    /// Converting raw blocks into the consumer-facing batch format
    Format,
    /// Inside caller-supplied code
    User,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Wait, Phase::Get, Phase::Format, Phase::User];

    #[inline]
    fn index(self) -> usize {
        match self {
            Phase::Wait => 0,
            Phase::Get => 1,
            Phase::Format => 2,
            Phase::User => 3,
        }
    }
}

/// Accumulated iterator time per phase, in nanoseconds
///
/// `total_ns` is always the exact sum of the four phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorTimes {
    pub wait_ns: u64,
    pub get_ns: u64,
    pub format_ns: u64,
    pub user_ns: u64,
    pub total_ns: u64,
}

impl IteratorTimes {
    pub fn from_phases(phases: [u64; 4]) -> Self {
        let [wait_ns, get_ns, format_ns, user_ns] = phases;
        Self {
            wait_ns,
            get_ns,
            format_ns,
            user_ns,
            total_ns: wait_ns + get_ns + format_ns + user_ns,
        }
    }

    pub fn phase(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Wait => self.wait_ns,
            Phase::Get => self.get_ns,
            Phase::Format => self.format_ns,
            Phase::User => self.user_ns,
        }
    }

    /// Time inside the iterator machinery, excluding user code
    pub fn iterator_ns(&self) -> u64 {
        self.wait_ns + self.get_ns + self.format_ns
    }
}

impl AddAssign for IteratorTimes {
    fn add_assign(&mut self, rhs: Self) {
        *self = IteratorTimes::from_phases([
            self.wait_ns + rhs.wait_ns,
            self.get_ns + rhs.get_ns,
            self.format_ns + rhs.format_ns,
            self.user_ns + rhs.user_ns,
        ]);
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    totals: [u64; 4],
    active: Option<(Phase, u64)>,
    reported: [u64; 4],
}

/// Accumulates time spent in each [`Phase`] of one consumption loop
#[derive(Debug)]
pub struct IteratorTimeTracker {
    clock: SharedClock,
    state: Mutex<TrackerState>,
    diagnostics: Arc<Diagnostics>,
}

impl IteratorTimeTracker {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_diagnostics(clock, Arc::new(Diagnostics::new()))
    }

    pub fn with_diagnostics(clock: SharedClock, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            clock,
            state: Mutex::new(TrackerState::default()),
            diagnostics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fold a finished interval into the totals
    ///
    /// A regressed interval counts as zero, but time a snapshot already
    /// reported for the open phase is committed, so later time in the same
    /// phase adds on top of it instead of being absorbed by the high-water
    /// mark.
    fn close(&self, state: &mut TrackerState, phase: Phase, start: u64, now: u64) {
        let i = phase.index();
        if now < start {
            self.diagnostics.clock_regressions.add(1);
            tracing::warn!(
                ?phase,
                regression_ns = start - now,
                "clock went backwards, clamping phase duration to zero"
            );
        } else {
            state.totals[i] += now - start;
        }
        state.totals[i] = state.totals[i].max(state.reported[i]);
    }

    /// Start timing `phase`, closing any phase still open
    pub fn enter(&self, phase: Phase) {
        let now = self.clock.now_nanos();
        let mut state = self.lock();
        if let Some((open, start)) = state.active.take() {
            tracing::trace!(?open, next = ?phase, "implicitly closing open phase");
            self.close(&mut state, open, start, now);
        }
        state.active = Some((phase, now));
    }

    /// Stop timing `phase`
    ///
    /// An exit that does not match the active phase is counted and ignored.
    pub fn exit(&self, phase: Phase) {
        let now = self.clock.now_nanos();
        let mut state = self.lock();
        match state.active {
            Some((open, start)) if open == phase => {
                state.active = None;
                self.close(&mut state, open, start, now);
            }
            active => {
                self.diagnostics.unmatched_phase_exits.add(1);
                tracing::debug!(?phase, active = ?active.map(|(p, _)| p), "unmatched phase exit");
            }
        }
    }

    /// Bracket a scope in `phase`; the phase exits when the guard drops
    pub fn time(&self, phase: Phase) -> PhaseGuard<'_> {
        self.enter(phase);
        PhaseGuard { tracker: self, phase }
    }

    /// The currently open phase, if any
    pub fn active_phase(&self) -> Option<Phase> {
        self.lock().active.map(|(phase, _)| phase)
    }

    /// Consistent view of all four accumulators
    ///
    /// Time elapsed so far in an open phase is included.
    pub fn snapshot(&self) -> IteratorTimes {
        let now = self.clock.now_nanos();
        let mut state = self.lock();

        let mut phases = state.totals;
        if let Some((open, start)) = state.active {
            phases[open.index()] += now.saturating_sub(start);
        }
        for (reported, current) in state.reported.iter_mut().zip(phases.iter_mut()) {
            *reported = (*reported).max(*current);
            *current = *reported;
        }

        IteratorTimes::from_phases(phases)
    }
}

/// Scope guard returned by [`IteratorTimeTracker::time`]
#[must_use = "the phase ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PhaseGuard<'a> {
    tracker: &'a IteratorTimeTracker,
    phase: Phase,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.tracker.exit(self.phase);
    }
}
