//! Append-only per-window history

use super::dataset::DatasetStatsReport;
use super::iterator::IteratorTimes;
use super::StatSummary;
use crate::error::StatsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One completed pipeline window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub window_index: u64,
    pub report: DatasetStatsReport,
    /// Stages whose output was reused from an earlier window
    pub cached_stages: BTreeSet<String>,
    /// Time the consumer waited for this window to become ready.
    /// Always `None` for window 0.
    pub stall_ns: Option<u64>,
}

impl WindowEntry {
    pub fn new(window_index: u64, report: DatasetStatsReport) -> Self {
        let cached_stages = report
            .stages
            .iter()
            .filter(|s| s.is_cached())
            .map(|s| s.stage_name().to_string())
            .collect();
        Self {
            window_index,
            report,
            cached_stages,
            stall_ns: None,
        }
    }

    pub fn with_stall(mut self, stall_ns: u64) -> Self {
        if self.window_index > 0 {
            self.stall_ns = Some(stall_ns);
        }
        self
    }
}

/// Completed windows in strictly increasing index order
///
/// Entries are never removed or reordered. Appending anything other than
/// `last + 1` (or `0` first) is a bug in the consuming loop and fails with
/// [`StatsError::OutOfOrderWindow`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowHistory {
    entries: Vec<WindowEntry>,
}

impl WindowHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next appended window must carry
    pub fn next_index(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.window_index + 1)
    }

    pub fn append(&mut self, entry: WindowEntry) -> Result<(), StatsError> {
        let expected = self.next_index();
        if entry.window_index != expected {
            return Err(StatsError::OutOfOrderWindow {
                expected,
                got: entry.window_index,
            });
        }
        tracing::debug!(
            window = entry.window_index,
            cached = entry.cached_stages.len(),
            "window appended to history"
        );
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[WindowEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stall time across windows 1..N
    pub fn stall_summary(&self) -> StatSummary {
        StatSummary::from_values(self.entries.iter().filter_map(|e| e.stall_ns))
    }

    /// Iterator time summed over every window
    pub fn iterator_totals(&self) -> IteratorTimes {
        let mut totals = IteratorTimes::default();
        for entry in &self.entries {
            totals += entry.report.iterator;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::dataset::StageReport;

    fn entry(index: u64) -> WindowEntry {
        WindowEntry::new(index, DatasetStatsReport::default())
    }

    #[test]
    fn test_append_in_order() {
        let mut history = WindowHistory::new();
        for i in 0..5 {
            history.append(entry(i)).unwrap();
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.next_index(), 5);
    }

    #[test]
    fn test_first_window_must_be_zero() {
        let mut history = WindowHistory::new();
        let err = history.append(entry(1)).unwrap_err();
        assert_eq!(err, StatsError::OutOfOrderWindow { expected: 0, got: 1 });
        assert!(history.is_empty());
    }

    #[test]
    fn test_duplicate_and_gap_rejected() {
        let mut history = WindowHistory::new();
        history.append(entry(0)).unwrap();

        assert_eq!(
            history.append(entry(0)).unwrap_err(),
            StatsError::OutOfOrderWindow { expected: 1, got: 0 }
        );
        assert_eq!(
            history.append(entry(2)).unwrap_err(),
            StatsError::OutOfOrderWindow { expected: 1, got: 2 }
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_cached_stage_mask_from_report() {
        let report = DatasetStatsReport::new(
            vec![
                StageReport::Cached { stage_name: "read".into() },
                StageReport::Cached { stage_name: "map_batches".into() },
            ],
            IteratorTimes::default(),
        );
        let entry = WindowEntry::new(1, report);
        assert_eq!(
            entry.cached_stages.iter().map(String::as_str).collect::<Vec<_>>(),
            ["map_batches", "read"]
        );
    }

    #[test]
    fn test_stall_ignores_first_window() {
        let mut history = WindowHistory::new();
        history.append(entry(0).with_stall(1_000_000)).unwrap();
        history.append(entry(1).with_stall(2_000)).unwrap();
        history.append(entry(2).with_stall(4_000)).unwrap();

        let stall = history.stall_summary();
        assert_eq!(stall.count, 2);
        assert_eq!(stall.min, 2_000);
        assert_eq!(stall.max, 4_000);
        assert_eq!(stall.total, 6_000);
        assert_eq!(stall.mean, 3_000.0);
    }

    #[test]
    fn test_iterator_totals() {
        let mut history = WindowHistory::new();
        for i in 0..3 {
            let report = DatasetStatsReport::new(vec![], IteratorTimes::from_phases([1, 2, 3, 4]));
            history.append(WindowEntry::new(i, report)).unwrap();
        }
        let totals = history.iterator_totals();
        assert_eq!(totals, IteratorTimes::from_phases([3, 6, 9, 12]));
        assert_eq!(totals.iterator_ns(), 18);
    }
}
