//! Human-readable text output
//!
//! The layout here is a compatibility surface: tooling downstream parses it,
//! so labels, punctuation and blank lines must stay byte-for-byte stable.
//! Every function is total over well-formed reports.

use crate::stats::aggregator::StageSummary;
use crate::stats::dataset::{DatasetStatsReport, StageReport};
use crate::stats::iterator::IteratorTimes;
use crate::stats::pipeline::PipelineStatsReport;
use crate::stats::StatSummary;
use crate::util::time::{format_count, format_duration, format_mean_count, format_mean_duration};
use std::fmt::Write;

fn duration_stats(stats: &StatSummary) -> String {
    format!(
        "{} min, {} max, {} mean, {} total",
        format_duration(stats.min),
        format_duration(stats.max),
        format_mean_duration(stats.mean),
        format_duration(stats.total)
    )
}

fn count_stats(stats: &StatSummary) -> String {
    format!(
        "{} min, {} max, {} mean, {} total",
        format_count(stats.min),
        format_count(stats.max),
        format_mean_count(stats.mean),
        format_count(stats.total)
    )
}

/// Render one executed stage, without the separating blank line
pub fn render_stage(index: usize, summary: &StageSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Stage {} {}: {}/{} blocks executed in {}",
        index,
        summary.stage_name,
        format_count(summary.blocks_executed),
        format_count(summary.blocks_expected),
        format_duration(summary.wall_time.total)
    );
    let _ = writeln!(out, "* Remote wall time: {}", duration_stats(&summary.wall_time));
    let _ = writeln!(out, "* Remote cpu time: {}", duration_stats(&summary.cpu_time));
    let _ = writeln!(out, "* Output num rows: {}", count_stats(&summary.output_rows));
    let _ = writeln!(out, "* Output size bytes: {}", count_stats(&summary.output_bytes));
    let _ = writeln!(
        out,
        "* Tasks per node: {} min, {} max, {} mean; {} nodes used",
        format_count(summary.tasks_per_node.min),
        format_count(summary.tasks_per_node.max),
        format_mean_count(summary.tasks_per_node.mean),
        format_count(summary.distinct_node_count)
    );
    out
}

/// Render a stage whose output was reused from an earlier window
pub fn render_cached_stage(index: usize, stage_name: &str) -> String {
    format!("Stage {} {}: [execution cached]\n", index, stage_name)
}

/// Render the consuming loop's time breakdown
pub fn render_iterator_breakdown(times: &IteratorTimes) -> String {
    let mut out = String::new();
    out.push_str("Dataset iterator time breakdown:\n");
    let _ = writeln!(out, "* In ray.wait(): {}", format_duration(times.wait_ns));
    let _ = writeln!(out, "* In ray.get(): {}", format_duration(times.get_ns));
    let _ = writeln!(out, "* In format_batch(): {}", format_duration(times.format_ns));
    let _ = writeln!(out, "* In user code: {}", format_duration(times.user_ns));
    let _ = writeln!(out, "* Total time: {}", format_duration(times.total_ns));
    out
}

/// Render a dataset: stage blocks in execution order, then the breakdown
///
/// Executed stages are followed by a blank line; cached stages are one line
/// each with no separator.
pub fn render_dataset(report: &DatasetStatsReport) -> String {
    let mut out = String::new();
    for (index, stage) in report.stages.iter().enumerate() {
        match stage {
            StageReport::Executed(summary) => {
                out.push_str(&render_stage(index, summary));
                out.push('\n');
            }
            StageReport::Cached { stage_name } => {
                out.push_str(&render_cached_stage(index, stage_name));
            }
        }
    }
    out.push_str(&render_iterator_breakdown(&report.iterator));
    out
}

/// Render the cross-window summary section
pub fn render_overall(report: &PipelineStatsReport) -> String {
    let mut out = String::new();
    out.push_str("##### Overall Pipeline Time Breakdown #####\n");
    let _ = writeln!(
        out,
        "* Time stalled waiting for next dataset: {}",
        duration_stats(&report.stall)
    );
    let _ = writeln!(out, "* Time in dataset iterator: {}", format_duration(report.iterator_time_ns));
    let _ = writeln!(out, "* Time in user code: {}", format_duration(report.user_time_ns));
    let _ = writeln!(out, "* Total time: {}", format_duration(report.total_time_ns));
    out
}

/// Render a pipeline: one block per completed window, separated by blank
/// lines, plus the overall section when there is more than one window
pub fn render_pipeline(report: &PipelineStatsReport) -> String {
    let blocks: Vec<String> = report
        .windows
        .iter()
        .map(|entry| {
            format!(
                "== Pipeline Window {} ==\n{}",
                entry.window_index,
                render_dataset(&entry.report)
            )
        })
        .collect();

    let mut out = blocks.join("\n");
    if report.windows.len() > 1 {
        out.push('\n');
        out.push_str(&render_overall(report));
    }
    out
}
