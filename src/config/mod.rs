//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use crate::output::ReportFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Report output configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Format printed to stdout
    #[serde(default)]
    pub format: ReportFormat,
    /// Also write the JSON report to this file
    pub json_output: Option<PathBuf>,
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Simulated execution engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of pipeline windows; 1 produces a plain dataset report
    #[serde(default = "default_windows")]
    pub windows: u64,
    /// Number of simulated nodes tasks are spread over
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// RNG seed for task durations and node placement
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Reuse every stage but the last from window 0 in later windows
    #[serde(default)]
    pub cache_upstream: bool,
    /// Number of independent split branches
    #[serde(default = "default_splits")]
    pub splits: usize,
    /// Tasks running at once per stage
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Consumer time spent per block in user code (e.g. "500us")
    #[serde(default = "default_user_time")]
    pub user_time: String,
    /// Stages in execution order
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

fn default_windows() -> u64 {
    1
}

fn default_nodes() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_splits() -> usize {
    1
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

fn default_user_time() -> String {
    "200us".to_string()
}

fn default_stages() -> Vec<StageConfig> {
    ["read", "map_batches", "map"]
        .into_iter()
        .map(StageConfig::named)
        .collect()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            windows: default_windows(),
            nodes: default_nodes(),
            seed: default_seed(),
            cache_upstream: false,
            splits: default_splits(),
            concurrency: default_concurrency(),
            user_time: default_user_time(),
            stages: default_stages(),
        }
    }
}

/// One simulated stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    /// Tasks (blocks) per window
    #[serde(default = "default_blocks")]
    pub blocks: u64,
    /// Mean task wall time (e.g. "2ms", "750us")
    #[serde(default = "default_task_time")]
    pub task_time: String,
    /// Standard deviation of task wall time, percent of the mean
    #[serde(default = "default_task_time_stddev")]
    pub task_time_stddev_percent: f64,
    /// Fraction of wall time spent on CPU (0.0-1.0)
    #[serde(default = "default_cpu_fraction")]
    pub cpu_fraction: f64,
    #[serde(default = "default_rows_per_block")]
    pub rows_per_block: u64,
    /// Output bytes per row (e.g. "8", "1k")
    #[serde(default = "default_row_size")]
    pub row_size: String,
}

fn default_blocks() -> u64 {
    10
}

fn default_task_time() -> String {
    "2ms".to_string()
}

fn default_task_time_stddev() -> f64 {
    10.0
}

fn default_cpu_fraction() -> f64 {
    0.8
}

fn default_rows_per_block() -> u64 {
    100
}

fn default_row_size() -> String {
    "8".to_string()
}

impl StageConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blocks: default_blocks(),
            task_time: default_task_time(),
            task_time_stddev_percent: default_task_time_stddev(),
            cpu_fraction: default_cpu_fraction(),
            rows_per_block: default_rows_per_block(),
            row_size: default_row_size(),
        }
    }
}
