//! CLI argument parsing using clap

use crate::output::ReportFormat;
use clap::Parser;
use std::path::PathBuf;

/// stagestats - per-stage execution stats for windowed dataset pipelines
///
/// Runs a simulated stage-based execution and prints the stats report the
/// pipeline would produce.
#[derive(Parser, Debug)]
#[command(name = "stagestats")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Simulation Options ===
    /// Number of pipeline windows
    #[arg(short = 'w', long)]
    pub windows: Option<u64>,

    /// Number of simulated nodes
    #[arg(short = 'n', long)]
    pub nodes: Option<usize>,

    /// Blocks per stage (overrides every stage)
    #[arg(short = 'b', long)]
    pub blocks: Option<u64>,

    /// Number of independent split branches
    #[arg(long)]
    pub splits: Option<usize>,

    /// RNG seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Tasks running at once per stage
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Reuse upstream stage output in windows after the first
    #[arg(long)]
    pub cache_upstream: bool,

    // === Output Options ===
    /// Report format printed to stdout
    #[arg(short = 'f', long, value_enum)]
    pub format: Option<ReportFormat>,

    /// Also write the JSON report to this file
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. warn, debug, stagestats=trace)
    #[arg(long, env = "STAGESTATS_LOG")]
    pub log_level: Option<String>,

    /// Validate and print the effective configuration, then exit
    #[arg(long)]
    pub dry_run: bool,
}
