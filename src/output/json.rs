//! JSON output formatting
//!
//! Machine-readable rendition of the same reports the text output shows.
//! Durations carry both raw nanoseconds and the text report's formatting.

use crate::stats::aggregator::StageSummary;
use crate::stats::dataset::{DatasetStatsReport, StageReport};
use crate::stats::iterator::IteratorTimes;
use crate::stats::pipeline::PipelineStatsReport;
use crate::stats::{DiagnosticsSnapshot, StatSummary};
use crate::util::time::{format_duration, format_mean_duration};
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Duration with both nanoseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub nanos: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_nanos(nanos: u64) -> Self {
        Self {
            nanos,
            human: format_duration(nanos),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDurationStats {
    pub min: JsonDuration,
    pub max: JsonDuration,
    pub mean: JsonDuration,
    pub total: JsonDuration,
}

impl From<&StatSummary> for JsonDurationStats {
    fn from(s: &StatSummary) -> Self {
        let mean_nanos = s.mean.round() as u64;
        Self {
            min: JsonDuration::from_nanos(s.min),
            max: JsonDuration::from_nanos(s.max),
            mean: JsonDuration {
                nanos: mean_nanos,
                human: format_mean_duration(s.mean),
            },
            total: JsonDuration::from_nanos(s.total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonStageMetrics {
    pub blocks_executed: u64,
    pub blocks_expected: u64,
    pub wall_time: JsonDurationStats,
    pub cpu_time: JsonDurationStats,
    pub output_rows: StatSummary,
    pub output_bytes: StatSummary,
    pub tasks_per_node: StatSummary,
    pub nodes_used: u64,
}

impl From<&StageSummary> for JsonStageMetrics {
    fn from(s: &StageSummary) -> Self {
        Self {
            blocks_executed: s.blocks_executed,
            blocks_expected: s.blocks_expected,
            wall_time: (&s.wall_time).into(),
            cpu_time: (&s.cpu_time).into(),
            output_rows: s.output_rows,
            output_bytes: s.output_bytes,
            tasks_per_node: s.tasks_per_node,
            nodes_used: s.distinct_node_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonStage {
    pub index: usize,
    pub name: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<JsonStageMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonIterator {
    pub wait: JsonDuration,
    pub get: JsonDuration,
    pub format: JsonDuration,
    pub user: JsonDuration,
    pub total: JsonDuration,
}

impl From<&IteratorTimes> for JsonIterator {
    fn from(t: &IteratorTimes) -> Self {
        Self {
            wait: JsonDuration::from_nanos(t.wait_ns),
            get: JsonDuration::from_nanos(t.get_ns),
            format: JsonDuration::from_nanos(t.format_ns),
            user: JsonDuration::from_nanos(t.user_ns),
            total: JsonDuration::from_nanos(t.total_ns),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stall: Option<JsonDuration>,
    pub stages: Vec<JsonStage>,
    pub iterator: JsonIterator,
}

fn dataset_json(report: &DatasetStatsReport, window_index: Option<u64>, stall_ns: Option<u64>) -> JsonDataset {
    let stages = report
        .stages
        .iter()
        .enumerate()
        .map(|(index, stage)| JsonStage {
            index,
            name: stage.stage_name().to_string(),
            cached: stage.is_cached(),
            metrics: match stage {
                StageReport::Executed(summary) => Some(summary.into()),
                StageReport::Cached { .. } => None,
            },
        })
        .collect();

    JsonDataset {
        window_index,
        stall: stall_ns.map(JsonDuration::from_nanos),
        stages,
        iterator: (&report.iterator).into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonOverall {
    pub stall: JsonDurationStats,
    pub iterator_time: JsonDuration,
    pub user_time: JsonDuration,
    pub total_time: JsonDuration,
}

/// Top-level JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub tool: String,
    pub version: String,
    /// RFC 3339 timestamp of report generation
    pub generated_at: String,
    /// Split branch this report belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,
    pub windows: Vec<JsonDataset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall: Option<JsonOverall>,
    pub diagnostics: DiagnosticsSnapshot,
}

fn envelope(windows: Vec<JsonDataset>, overall: Option<JsonOverall>, diagnostics: DiagnosticsSnapshot) -> JsonReport {
    JsonReport {
        tool: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: chrono::Utc::now().to_rfc3339(),
        branch: None,
        windows,
        overall,
        diagnostics,
    }
}

/// JSON document for a single dataset
pub fn dataset_to_json(report: &DatasetStatsReport, diagnostics: DiagnosticsSnapshot) -> JsonReport {
    envelope(vec![dataset_json(report, None, None)], None, diagnostics)
}

/// JSON document for a pipeline; `overall` is present only for 2+ windows,
/// as in the text report
pub fn pipeline_to_json(report: &PipelineStatsReport, diagnostics: DiagnosticsSnapshot) -> JsonReport {
    let windows = report
        .windows
        .iter()
        .map(|w| dataset_json(&w.report, Some(w.window_index), w.stall_ns))
        .collect();

    let overall = (report.windows.len() > 1).then(|| JsonOverall {
        stall: (&report.stall).into(),
        iterator_time: JsonDuration::from_nanos(report.iterator_time_ns),
        user_time: JsonDuration::from_nanos(report.user_time_ns),
        total_time: JsonDuration::from_nanos(report.total_time_ns),
    });

    envelope(windows, overall, diagnostics)
}

/// Serialize one report, or several split branches as an array
pub fn to_string_pretty<T: Serialize + ?Sized>(report: &T) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize JSON report")
}

/// Write a JSON report to a file
pub fn write_json_output<T: Serialize + ?Sized>(path: &Path, report: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create JSON output file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("Failed to write JSON output: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::window::WindowEntry;

    fn summary() -> StageSummary {
        StageSummary {
            stage_name: "read".to_string(),
            blocks_executed: 2,
            blocks_expected: 2,
            wall_time: StatSummary::from_values([1_000_000, 2_000_000]),
            cpu_time: StatSummary::from_values([1_000, 1_000]),
            output_rows: StatSummary::from_values([10, 20]),
            output_bytes: StatSummary::from_values([80, 160]),
            tasks_per_node: StatSummary::from_values([2]),
            distinct_node_count: 1,
        }
    }

    #[test]
    fn test_dataset_json_shape() {
        let report = DatasetStatsReport::new(
            vec![
                StageReport::Executed(summary()),
                StageReport::Cached { stage_name: "map".into() },
            ],
            IteratorTimes::from_phases([1_000, 0, 0, 2_000]),
        );
        let doc = dataset_to_json(&report, DiagnosticsSnapshot::default());

        assert_eq!(doc.tool, "stagestats");
        assert_eq!(doc.windows.len(), 1);
        assert!(doc.overall.is_none());

        let stages = &doc.windows[0].stages;
        assert!(!stages[0].cached);
        let metrics = stages[0].metrics.as_ref().unwrap();
        assert_eq!(metrics.wall_time.total.human, "3.00ms");
        assert_eq!(metrics.wall_time.mean.nanos, 1_500_000);
        assert!(stages[1].cached);
        assert!(stages[1].metrics.is_none());
        assert_eq!(doc.windows[0].iterator.total.nanos, 3_000);
    }

    #[test]
    fn test_pipeline_json_overall_only_for_multiple_windows() {
        let single = PipelineStatsReport {
            windows: vec![WindowEntry::new(0, DatasetStatsReport::default())],
            ..Default::default()
        };
        assert!(pipeline_to_json(&single, DiagnosticsSnapshot::default()).overall.is_none());

        let double = PipelineStatsReport {
            windows: vec![
                WindowEntry::new(0, DatasetStatsReport::default()),
                WindowEntry::new(1, DatasetStatsReport::default()).with_stall(5_000),
            ],
            stall: StatSummary::from_values([5_000]),
            total_time_ns: 10_000,
            ..Default::default()
        };
        let doc = pipeline_to_json(&double, DiagnosticsSnapshot::default());
        let overall = doc.overall.as_ref().unwrap();
        assert_eq!(overall.stall.total.nanos, 5_000);
        assert_eq!(overall.total_time.human, "10.00us");
        assert_eq!(doc.windows[1].stall.as_ref().unwrap().nanos, 5_000);
        assert!(doc.windows[0].stall.is_none());
    }

    #[test]
    fn test_json_serializes_and_writes() {
        let doc = dataset_to_json(&DatasetStatsReport::default(), DiagnosticsSnapshot::default());
        let text = to_string_pretty(&doc).unwrap();
        assert!(text.contains("\"generated_at\""));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_json_output(&path, &doc).unwrap();

        let parsed: JsonReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.windows.len(), 1);
    }
}
