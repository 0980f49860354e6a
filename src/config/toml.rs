//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the configuration named on the command line (or defaults) and
/// apply CLI overrides
pub fn load(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    let sim = &mut config.simulation;
    if let Some(windows) = cli.windows {
        sim.windows = windows;
    }
    if let Some(nodes) = cli.nodes {
        sim.nodes = nodes;
    }
    if let Some(splits) = cli.splits {
        sim.splits = splits;
    }
    if let Some(seed) = cli.seed {
        sim.seed = seed;
    }
    if let Some(concurrency) = cli.concurrency {
        sim.concurrency = concurrency;
    }
    if cli.cache_upstream {
        sim.cache_upstream = true;
    }
    if let Some(blocks) = cli.blocks {
        for stage in &mut sim.stages {
            stage.blocks = blocks;
        }
    }

    if let Some(format) = cli.format {
        config.report.format = format;
    }
    if let Some(ref path) = cli.json_output {
        config.report.json_output = Some(path.clone());
    }
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

/// Parse duration string (e.g., "100us", "1ms", "1.5s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("us") {
        (num, "us")
    } else if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = s.strip_suffix('s') {
        (num, "s")
    } else {
        anyhow::bail!("Duration must end with us, ms, or s");
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in duration: {}", num_str))?;

    let seconds = match unit {
        "us" => num / 1_000_000.0,
        "ms" => num / 1_000.0,
        _ => num,
    };

    Duration::try_from_secs_f64(seconds).with_context(|| format!("Invalid duration: {}", s))
}

/// Parse size string (e.g., "1G", "100M", "4k") to bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    if s.is_empty() {
        anyhow::bail!("Empty size string");
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('K') {
        (num, 1024u64)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('G') {
        (num, 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid number in size: {}", num_str))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size overflows: {}", s))
}
